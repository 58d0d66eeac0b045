use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand, ValueEnum};
use geopulse_logic::{AuthorizationStatus, LocationFix, ProviderErrorKind, TrackingConfiguration};
use geopulse_test_shared::*;
use interprocess::local_socket::{tokio::Stream, traits::tokio::Stream as _};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    time::{Instant, timeout_at},
};

#[derive(Parser)]
struct Cli {
    /// Name of the local socket the test daemon is listening on
    socket: String,

    /// Keep printing observer events for this many seconds once the request completes
    #[arg(long, default_value_t = 0)]
    wait: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ErrorKindValue {
    LocationUnknown,
    Denied,
    Network,
    SignalLost,
}

impl From<ErrorKindValue> for ProviderErrorKind {
    fn from(value: ErrorKindValue) -> Self {
        match value {
            ErrorKindValue::LocationUnknown => ProviderErrorKind::LocationUnknown,
            ErrorKindValue::Denied => ProviderErrorKind::Denied,
            ErrorKindValue::Network => ProviderErrorKind::Network,
            ErrorKindValue::SignalLost => ProviderErrorKind::SignalLost,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StatusValue {
    NotDetermined,
    Restricted,
    Denied,
    Always,
    WhenInUse,
}

impl From<StatusValue> for AuthorizationStatus {
    fn from(value: StatusValue) -> Self {
        match value {
            StatusValue::NotDetermined => AuthorizationStatus::NotDetermined,
            StatusValue::Restricted => AuthorizationStatus::Restricted,
            StatusValue::Denied => AuthorizationStatus::Denied,
            StatusValue::Always => AuthorizationStatus::AuthorizedAlways,
            StatusValue::WhenInUse => AuthorizationStatus::AuthorizedWhenInUse,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Replace the tracking configuration with one read from a JSON file
    Configure { path: PathBuf },
    /// Start continuous location updates
    Start,
    /// Stop continuous location updates
    Stop,
    /// Start monitoring significant location changes
    StartSignificant,
    /// Stop monitoring significant location changes
    StopSignificant,
    /// Request a single location
    Single,
    /// Register the daemon's forwarding observer again
    Observe,
    /// Deliver a fix as if the platform had produced it
    #[command(allow_negative_numbers = true)]
    Fix {
        lat: f64,
        long: f64,
        /// Horizontal accuracy in meters
        #[arg(default_value_t = 5.0)]
        accuracy: f64,
    },
    /// Fail as if the platform had reported an error
    Error {
        #[arg(value_enum)]
        kind: ErrorKindValue,
    },
    /// Answer the permission prompt
    Authorize {
        #[arg(value_enum)]
        status: StatusValue,
    },
    /// Print the service state
    Status,
}

impl Commands {
    fn into_request(self) -> Result<TestingRequest> {
        Ok(match self {
            Commands::Configure { path } => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                let config: TrackingConfiguration =
                    serde_json::from_str(&raw).context("Failed to parse tracking configuration")?;
                TestingRequest::Configure(config)
            }
            Commands::Start => TestingRequest::StartUpdates,
            Commands::Stop => TestingRequest::StopUpdates,
            Commands::StartSignificant => TestingRequest::StartSignificant,
            Commands::StopSignificant => TestingRequest::StopSignificant,
            Commands::Single => TestingRequest::RequestSingle,
            Commands::Observe => TestingRequest::AddObserver,
            Commands::Fix {
                lat,
                long,
                accuracy,
            } => TestingRequest::InjectFixes(vec![LocationFix::new(lat, long, accuracy)]),
            Commands::Error { kind } => TestingRequest::InjectError(kind.into()),
            Commands::Authorize { status } => TestingRequest::Authorize(status.into()),
            Commands::Status => TestingRequest::Status,
        })
    }
}

fn print_resp(line: &str) -> Result<TestingResponse> {
    let resp: TestingResponse =
        serde_json::from_str(line).context("Daemon sent an invalid response")?;
    println!(
        "{}",
        serde_json::to_string_pretty(&resp).context("Failed to format response")?
    );
    Ok(resp)
}

/// Deadline for the trailing `--wait`, saturating instead of overflowing
fn wait_deadline(now: Instant, wait_secs: u64) -> Instant {
    now.checked_add(Duration::from_secs(wait_secs))
        .unwrap_or(now + Duration::from_secs(86400 * 365 * 30))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result {
    let cli = Cli::parse();

    let req = cli.command.into_request()?;
    let socket_name = get_socket_name(cli.socket).context("Failed to get socket name")?;

    let stream = Stream::connect(socket_name)
        .await
        .context("Failed to connect to socket")?;

    let mut encoded = serde_json::to_vec(&req).context("Failed to encode request")?;
    encoded.push(b'\n');
    let mut send = &stream;
    send.write_all(&encoded).await.context("Failed to send request")?;

    let mut recv = BufReader::new(&stream);
    let mut line = String::with_capacity(256);

    let last = loop {
        line.clear();
        if recv.read_line(&mut line).await? == 0 {
            bail!("Daemon closed the connection before finishing the request");
        }
        let resp = print_resp(&line)?;
        if resp.ends_request() {
            break resp;
        }
    };

    if let TestingResponse::Error(why) = last {
        bail!("Daemon rejected the request: {why}");
    }

    let until = wait_deadline(Instant::now(), cli.wait);
    loop {
        line.clear();
        match timeout_at(until, recv.read_line(&mut line)).await {
            Err(_) | Ok(Ok(0)) => break,
            Ok(res) => {
                res.context("Failed to read from daemon")?;
                print_resp(&line)?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_deadline() {
        let now = Instant::now();
        assert_eq!(wait_deadline(now, 3), now + Duration::from_secs(3));
        assert!(wait_deadline(now, u64::MAX) > now);
    }

    #[test]
    fn test_fix_accepts_negative_coordinates() {
        let cli = Cli::try_parse_from(["driver", "sock", "fix", "-33.8", "-151.2", "12"])
            .expect("Failed to parse");
        let req = cli.command.into_request().unwrap();
        assert!(matches!(
            req,
            TestingRequest::InjectFixes(fixes)
                if fixes.len() == 1 && fixes[0].coordinates.lat == -33.8
        ));
    }
}
