//! Integration tests: HTTP → gateway → pipeline → in-memory chain.

mod mock_chain;
mod withdraw_flow;
