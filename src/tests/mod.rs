// Behaviour tests for the lease state machine and the daemon runner.
// Unit tests for individual modules live next to the code.

mod helpers;
