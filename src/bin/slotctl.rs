//! Interactive UDP client for the facility-booking server.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::lookup_host;

use slotd::client::{Client, Outcome};
use slotd::model::{WallClock, format_minute_of_day, format_minute_of_week};
use slotd::proto::{OpCode, QueryReply, Response, ResponseCode};

#[derive(Parser)]
#[command(name = "slotctl", about = "Interactive client for the slotd booking server")]
struct Args {
    #[arg(default_value = "127.0.0.1")]
    host: String,

    #[arg(default_value_t = 9876)]
    port: u16,

    /// Local port to bind; 0 picks an ephemeral port.
    #[arg(default_value_t = 0)]
    bind_port: u16,
}

const USAGE: &str = "commands: query <name> [day…] | book <name> sD sH sM eD eH eM | \
change <id> <offset> | monitor <name> <seconds> | op_a [name] | op_b [name] | \
set timeout <ms> | set retries <n> | exit";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let server: SocketAddr = lookup_host((args.host.as_str(), args.port))
        .await?
        .next()
        .ok_or("could not resolve server address")?;
    let mut client = Client::connect(server, args.bind_port).await?;

    println!("connected to {server} (local {})", client.local_addr()?);
    println!(
        "timeout={}ms retries={}",
        client.timeout().as_millis(),
        client.retries()
    );
    println!("{USAGE}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        use std::io::Write;
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else { break };
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(&cmd) = parts.first() else { continue };

        match cmd {
            "exit" => break,
            "set" => handle_set(&mut client, &parts),
            "query" => {
                if parts.len() < 2 {
                    println!("usage: query <name> [day…]  (days 0=Mon..6=Sun)");
                    continue;
                }
                let Some(days) = parse_all::<u8>(&parts[2..]) else {
                    println!("days must be integers 0..6");
                    continue;
                };
                let outcome = client.query(parts[1], days).await?;
                print_outcome(&client, OpCode::Query, outcome);
            }
            "book" => {
                if parts.len() != 8 {
                    println!("usage: book <name> sDay sHour sMin eDay eHour eMin");
                    continue;
                }
                let Some(t) = parse_all::<u8>(&parts[2..8]) else {
                    println!("time fields must be integers");
                    continue;
                };
                let outcome = client
                    .book(
                        parts[1],
                        WallClock::new(t[0], t[1], t[2]),
                        WallClock::new(t[3], t[4], t[5]),
                    )
                    .await?;
                print_outcome(&client, OpCode::Book, outcome);
            }
            "change" => {
                let (Some(&id), Some(&offset)) = (parts.get(1), parts.get(2)) else {
                    println!("usage: change <confirmationId> <offsetMinutes>");
                    continue;
                };
                let (Ok(id), Ok(offset)) = (id.parse::<u32>(), offset.parse::<i32>()) else {
                    println!("usage: change <confirmationId> <offsetMinutes>");
                    continue;
                };
                let outcome = client.change(id, offset).await?;
                print_outcome(&client, OpCode::Change, outcome);
            }
            "monitor" => {
                let (Some(&name), Some(&secs)) = (parts.get(1), parts.get(2)) else {
                    println!("usage: monitor <name> <intervalSeconds>");
                    continue;
                };
                let Ok(secs) = secs.parse::<u32>() else {
                    println!("usage: monitor <name> <intervalSeconds>");
                    continue;
                };
                let outcome = client.register_monitor(name, secs).await?;
                let registered = matches!(
                    &outcome,
                    Outcome::Reply(rsp) if rsp.code == ResponseCode::Ok
                );
                print_outcome(&client, OpCode::RegisterMonitor, outcome);
                if registered {
                    println!("waiting for monitor callbacks for {secs} seconds...");
                    let n = client
                        .monitor_wait(Duration::from_secs(secs as u64), |cb| {
                            println!(
                                "[monitor update] facility={} bookings={}",
                                cb.facility,
                                cb.segments.len()
                            );
                            for segment in &cb.segments {
                                println!(
                                    "  - {} .. {}",
                                    format_minute_of_week(segment.start),
                                    format_minute_of_week(segment.end)
                                );
                            }
                        })
                        .await?;
                    println!("monitor interval ended ({n} update(s) received)");
                }
            }
            "op_a" => {
                let outcome = client.op_a(parts.get(1).copied()).await?;
                print_outcome(&client, OpCode::OpA, outcome);
            }
            "op_b" => {
                let outcome = client.op_b(parts.get(1).copied()).await?;
                print_outcome(&client, OpCode::OpB, outcome);
            }
            _ => println!("unknown command: {cmd}\n{USAGE}"),
        }
    }
    Ok(())
}

fn handle_set(client: &mut Client, parts: &[&str]) {
    match (parts.get(1), parts.get(2).and_then(|v| v.parse::<u32>().ok())) {
        (Some(&"timeout"), Some(ms)) => {
            client.set_timeout(Duration::from_millis(ms as u64));
            println!("timeout set to {ms} ms");
        }
        (Some(&"retries"), Some(n)) => {
            client.set_retries(n);
            println!("retries set to {n}");
        }
        _ => println!("usage: set timeout <ms> | set retries <n>"),
    }
}

fn parse_all<T: std::str::FromStr>(parts: &[&str]) -> Option<Vec<T>> {
    parts.iter().map(|p| p.parse::<T>().ok()).collect()
}

fn print_outcome(client: &Client, op: OpCode, outcome: Outcome) {
    match outcome {
        Outcome::Reply(rsp) => print_response(op, &rsp),
        Outcome::TimedOut { attempts } => {
            println!("no reply after {attempts} attempt(s)");
            println!(
                "warning: under at-least-once semantics the operation may have \
                 executed anyway, possibly more than once (retries={})",
                client.retries()
            );
        }
    }
}

fn print_response(op: OpCode, rsp: &Response) {
    println!("=== server response: {} ===", rsp.code);
    if rsp.code != ResponseCode::Ok {
        println!("{}", String::from_utf8_lossy(&rsp.payload));
        return;
    }
    match op {
        OpCode::Book | OpCode::OpB => match slotd::proto::decode_confirmation_id(&rsp.payload) {
            Ok(id) => println!("confirmation id: {id}"),
            Err(e) => println!("unparseable confirmation payload: {e}"),
        },
        OpCode::Query => match QueryReply::decode(&rsp.payload) {
            Ok(reply) => {
                for day in &reply.days {
                    println!("day {} ({} interval(s)):", day.day, day.intervals.len());
                    for &(s, e) in &day.intervals {
                        println!(
                            "  - {} .. {}",
                            format_minute_of_day(s as i32),
                            format_minute_of_day(e as i32)
                        );
                    }
                }
            }
            Err(e) => println!("unparseable query payload: {e}"),
        },
        _ => {
            if rsp.payload.is_empty() {
                println!("(ok)");
            } else {
                println!("payload: {} bytes", rsp.payload.len());
            }
        }
    }
}
