//! calc-client: send arithmetic requests to a calc-server
//!
//! Usage:
//!   calc-client <SERVER> <PORT> <OP> <A> <B> [--repeat N] [--request-id ID]
//!   calc-client <SERVER> <PORT>
//!
//! `OP` is an op name (`addition`), symbol (`+`) or code (`0`). Without an
//! operation the client prompts for each request on stdin until the user
//! declines to continue or stdin closes.

use calc_server::client::{hex, Client, ClientError, RttStats};
use calc_server::dispatch::OpCode;
use clap::Parser;
use std::io;
use std::str::FromStr;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tracing::warn;
use tracing_subscriber::EnvFilter;

const OP_PROMPT: &str = "\nEnter OpCode (0 for +, 1 for -, 2 for |, 3 for &, 4 for /, 5 for *): ";

/// Command-line arguments for the client
#[derive(Parser, Debug)]
#[command(name = "calc-client")]
#[command(version = "0.1.0")]
#[command(about = "Send arithmetic requests to a calc-server", long_about = None)]
#[command(allow_negative_numbers = true)]
struct ClientArgs {
    /// Server host name or address
    server: String,

    /// Server port
    port: u16,

    /// Operation: name, symbol, or op code. Omit for interactive mode
    #[arg(requires_all = ["operand_one", "operand_two"])]
    op: Option<OpCode>,

    /// First operand
    operand_one: Option<i32>,

    /// Second operand
    operand_two: Option<i32>,

    /// Number of requests to send
    #[arg(short = 'n', long, default_value_t = 1)]
    repeat: u32,

    /// Request id of the first request, incremented per request
    #[arg(long, default_value_t = 1)]
    request_id: u16,

    /// Per-request timeout in milliseconds
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,
}

/// Client state carried across requests.
struct Session {
    client: Client,
    stats: RttStats,
    request_id: u16,
}

impl Session {
    async fn send(&mut self, op: OpCode, a: i32, b: i32) -> Result<(), ClientError> {
        let exchange = match self.client.call(op, a, b, self.request_id).await {
            Ok(exchange) => exchange,
            Err(e) => {
                warn!(request_id = self.request_id, error = %e, "Request failed");
                return Err(e);
            }
        };
        self.stats.record(exchange.rtt);
        self.request_id = self.request_id.wrapping_add(1);

        let response = exchange.response;
        println!("\nRequest:  {}", hex(&exchange.request_bytes));
        println!("Response: {}", hex(&exchange.response_bytes));
        println!("\nResponse ID: {}", response.request_id);
        println!("Result: {}", response.result);
        if response.is_ok() {
            println!("Error Code: OK");
        } else {
            println!("Error Code: Error {}", response.error_code);
        }
        println!("\nRound trip time: {:?}", exchange.rtt);
        Ok(())
    }

    fn print_stats(&self) {
        if let (Some(min), Some(max), Some(avg)) =
            (self.stats.min(), self.stats.max(), self.stats.average())
        {
            println!("\nRequests: {}", self.stats.count());
            println!("Min RTT: {min:?}");
            println!("Max RTT: {max:?}");
            println!("Average RTT: {avg:?}");
        }
    }
}

/// Line-oriented prompts. `None` means the input closed.
struct Prompter<R, W> {
    lines: Lines<R>,
    output: W,
}

impl<R, W> Prompter<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    fn new(input: R, output: W) -> Self {
        Prompter {
            lines: input.lines(),
            output,
        }
    }

    async fn ask(&mut self, prompt: &str) -> io::Result<Option<String>> {
        self.output.write_all(prompt.as_bytes()).await?;
        self.output.flush().await?;
        self.lines.next_line().await
    }

    /// Re-prompts until the answer parses.
    async fn ask_parsed<T: FromStr>(&mut self, prompt: &str) -> io::Result<Option<T>> {
        loop {
            let Some(line) = self.ask(prompt).await? else {
                return Ok(None);
            };
            match line.trim().parse() {
                Ok(value) => return Ok(Some(value)),
                Err(_) => {
                    self.output
                        .write_all(b"Invalid input. Please enter a valid value.\n")
                        .await?;
                }
            }
        }
    }

    async fn confirm(&mut self, prompt: &str) -> io::Result<bool> {
        Ok(self
            .ask(prompt)
            .await?
            .is_some_and(|answer| answer.trim().eq_ignore_ascii_case("yes")))
    }

    /// Ask for the next operation and operands.
    async fn next_request(&mut self) -> io::Result<Option<(OpCode, i32, i32)>> {
        let Some(op) = self.ask_parsed::<OpCode>(OP_PROMPT).await? else {
            return Ok(None);
        };
        let Some(a) = self.ask_parsed::<i32>("Enter Operand 1: ").await? else {
            return Ok(None);
        };
        let Some(b) = self.ask_parsed::<i32>("Enter Operand 2: ").await? else {
            return Ok(None);
        };
        Ok(Some((op, a, b)))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = ClientArgs::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let client = Client::new(format!("{}:{}", args.server, args.port))
        .with_timeout(Duration::from_millis(args.timeout_ms));
    let mut session = Session {
        client,
        stats: RttStats::new(),
        request_id: args.request_id,
    };

    match (args.op, args.operand_one, args.operand_two) {
        (Some(op), Some(a), Some(b)) => {
            for _ in 0..args.repeat {
                session.send(op, a, b).await?;
            }
        }
        _ => {
            let mut prompter =
                Prompter::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout());
            while let Some((op, a, b)) = prompter.next_request().await? {
                session.send(op, a, b).await?;
                if !prompter
                    .confirm("\nDo you want to send another request? (yes/no): ")
                    .await?
                {
                    break;
                }
            }
        }
    }

    session.print_stats();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompter(input: &[u8]) -> Prompter<&[u8], Vec<u8>> {
        Prompter::new(input, Vec::new())
    }

    #[tokio::test]
    async fn test_next_request_accepts_names_symbols_and_codes() {
        let mut p = prompter(b"division\n-7\n2\n*\n6\n-7\n3\n1\n1\n");
        assert_eq!(
            p.next_request().await.unwrap(),
            Some((OpCode::Divide, -7, 2))
        );
        assert_eq!(
            p.next_request().await.unwrap(),
            Some((OpCode::Multiply, 6, -7))
        );
        assert_eq!(p.next_request().await.unwrap(), Some((OpCode::And, 1, 1)));
        assert_eq!(p.next_request().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_input_reprompts() {
        let mut p = prompter(b"modulo\n0\nabc\n4\n5\n");
        assert_eq!(p.next_request().await.unwrap(), Some((OpCode::Add, 4, 5)));

        let output = String::from_utf8(p.output).unwrap();
        assert_eq!(output.matches("Invalid input").count(), 2);
        assert_eq!(output.matches("Enter OpCode").count(), 2);
    }

    #[tokio::test]
    async fn test_input_closed_mid_request() {
        let mut p = prompter(b"0\n5\n");
        assert_eq!(p.next_request().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_confirm() {
        let mut p = prompter(b"YES\nno\n");
        assert!(p.confirm("again? ").await.unwrap());
        assert!(!p.confirm("again? ").await.unwrap());
        assert!(!p.confirm("again? ").await.unwrap());
    }

    #[test]
    fn test_op_requires_operands() {
        assert!(ClientArgs::try_parse_from(["calc-client", "localhost", "9000", "+"]).is_err());

        let args =
            ClientArgs::try_parse_from(["calc-client", "localhost", "9000", "-", "-7", "2"])
                .unwrap();
        assert_eq!(args.op, Some(OpCode::Subtract));
        assert_eq!(args.operand_one, Some(-7));

        let args = ClientArgs::try_parse_from(["calc-client", "localhost", "9000"]).unwrap();
        assert_eq!(args.op, None);
    }
}
