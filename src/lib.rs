//! calc-server: an arithmetic server over a fixed binary TCP protocol
//!
//! A client sends one request per connection carrying an op code, two
//! signed 32-bit operands, a request id and a UTF-16 op name. The server
//! answers with an 8-byte response holding the result, an error code
//! (0 or 127) and the echoed request id, then closes the connection.
//!
//! - `protocol`: byte-exact request/response codec
//! - `dispatch`: validation and arithmetic
//! - `server`: TCP host with timeout and signal handling
//! - `client`: one-shot client and RTT statistics
//! - `config`: CLI and TOML configuration

pub mod client;
pub mod config;
pub mod dispatch;
pub mod protocol;
pub mod server;
