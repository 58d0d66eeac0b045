use std::{
    path::PathBuf,
    sync::{Arc, Mutex as StdMutex},
};

use clap::Parser;
use geopulse_logic::{
    ActivityType, AuthorizationMode, AuthorizationStatus, DesiredAccuracy, DistanceFilter,
    HostCapabilities, LocationError, LocationFix, LocationObserver, LocationProvider,
    LocationService, ProviderEvent, TrackingConfiguration,
};
use geopulse_test_shared::*;
use interprocess::local_socket::{ListenerOptions, tokio::prelude::*};
use log::{error, info, warn};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::{Mutex, mpsc},
};

/// Stands in for the platform, the driver plays the part of the user and the GPS
struct SimulatedProvider {
    status: StdMutex<AuthorizationStatus>,
}

impl SimulatedProvider {
    fn new() -> Self {
        Self {
            status: StdMutex::new(AuthorizationStatus::NotDetermined),
        }
    }

    fn set_status(&self, status: AuthorizationStatus) {
        if let Ok(mut current) = self.status.lock() {
            *current = status;
        }
    }
}

impl LocationProvider for SimulatedProvider {
    fn set_desired_accuracy(&self, accuracy: DesiredAccuracy) {
        info!("[platform] desired accuracy = {accuracy:?}");
    }

    fn set_distance_filter(&self, filter: DistanceFilter) {
        info!("[platform] distance filter = {filter:?}");
    }

    fn set_activity_type(&self, activity: ActivityType) {
        info!("[platform] activity type = {activity:?}");
    }

    fn set_pauses_automatically(&self, pauses: bool) {
        info!("[platform] pauses automatically = {pauses}");
    }

    fn set_allows_background_updates(&self, allow: bool) {
        info!("[platform] background updates = {allow}");
    }

    fn start_continuous(&self) {
        info!("[platform] continuous updates started");
    }

    fn stop_continuous(&self) {
        info!("[platform] continuous updates stopped");
    }

    fn start_significant_changes(&self) {
        info!("[platform] significant change monitoring started");
    }

    fn stop_significant_changes(&self) {
        info!("[platform] significant change monitoring stopped");
    }

    fn request_authorization(&self, mode: AuthorizationMode) {
        info!("[platform] showing {mode:?} permission prompt, answer it with `authorize`");
    }

    fn authorization_status(&self) -> AuthorizationStatus {
        self.status
            .lock()
            .map(|status| *status)
            .unwrap_or_default()
    }
}

/// Forwards every observer callback to the connected driver
struct ForwardingObserver(mpsc::UnboundedSender<TestingResponse>);

impl ForwardingObserver {
    fn push(&self, resp: impl Into<TestingResponse>) {
        self.0.send(resp.into()).ok();
    }
}

impl LocationObserver for ForwardingObserver {
    fn received_location_updates(&self, locations: &[LocationFix]) {
        self.push(TestingResponse::Locations(locations.to_vec()));
    }

    fn location_failed(&self, error: &LocationError) {
        self.push(*error);
    }

    fn authorization_status_changed(&self, status: AuthorizationStatus) {
        self.push(status);
    }
}

type Service = LocationService<SimulatedProvider>;

struct DaemonState {
    service: Arc<Service>,
    provider: Arc<SimulatedProvider>,
    capabilities: HostCapabilities,
    observer: Arc<dyn LocationObserver>,
    responses: mpsc::UnboundedSender<TestingResponse>,
}

impl DaemonState {
    async fn new(
        config: TrackingConfiguration,
        capabilities: HostCapabilities,
        responses: mpsc::UnboundedSender<TestingResponse>,
    ) -> Result<Self> {
        config
            .validate(capabilities)
            .context("Initial configuration is invalid")?;

        let provider = Arc::new(SimulatedProvider::new());
        let service = Arc::new(Service::with_provider(provider.clone(), capabilities));
        service.configure(config).await;
        service.spawn();

        let observer: Arc<dyn LocationObserver> =
            Arc::new(ForwardingObserver(responses.clone()));
        service.add_delegate(&observer).await;

        Ok(Self {
            service,
            provider,
            capabilities,
            observer,
            responses,
        })
    }

    fn push_resp(&self, resp: impl Into<TestingResponse>) {
        self.responses
            .send(resp.into())
            .expect("Response channel closed");
    }

    async fn configure(&self, config: TrackingConfiguration) -> Result {
        config
            .validate(self.capabilities)
            .context("Rejected configuration")?;
        self.service.configure(config).await;
        Ok(())
    }

    pub async fn process_req(&mut self, req: TestingRequest) -> Result<(), TestingResponse> {
        match req {
            TestingRequest::Configure(config) => self.configure(config).await?,
            TestingRequest::StartUpdates => self.service.start_location_updates().await,
            TestingRequest::StopUpdates => self.service.stop_location_updates().await,
            TestingRequest::StartSignificant => {
                self.service.start_monitoring_significant_changes().await
            }
            TestingRequest::StopSignificant => {
                self.service.stop_monitoring_significant_changes().await
            }
            TestingRequest::RequestSingle => {
                let responses = self.responses.clone();
                self.service
                    .request_single_location(move |fix| {
                        responses
                            .send(TestingResponse::SingleShotResolved(fix))
                            .ok();
                    })
                    .await;
            }
            TestingRequest::AddObserver => {
                if !self.service.add_delegate(&self.observer).await {
                    warn!("Observer already registered");
                }
            }
            TestingRequest::InjectFixes(fixes) => {
                self.service
                    .handle_provider_event(ProviderEvent::Locations(fixes))
                    .await
            }
            TestingRequest::InjectError(kind) => {
                self.service
                    .handle_provider_event(ProviderEvent::Error(kind))
                    .await
            }
            TestingRequest::Authorize(status) => {
                self.provider.set_status(status);
                self.service
                    .handle_provider_event(ProviderEvent::AuthorizationChanged(status))
                    .await
            }
            TestingRequest::Status => self.push_resp(self.service.status().await),
        }
        Ok(())
    }
}

#[derive(Parser)]
struct Cli {
    /// Name of the local socket to listen on
    socket: String,

    /// JSON file holding the initial tracking configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Act as if the host declared the background location capability
    #[arg(long)]
    background_capable: bool,
}

fn load_config(path: Option<&PathBuf>) -> Result<TrackingConfiguration> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&raw).context("Failed to parse tracking configuration")
        }
        None => Ok(TrackingConfiguration::default()),
    }
}

#[tokio::main(flavor = "current_thread")]
pub async fn main() -> Result {
    colog::init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    let capabilities = HostCapabilities {
        background_location: cli.background_capable,
    };

    let socket_name = get_socket_name(cli.socket)?;
    let opts = ListenerOptions::new().name(socket_name);
    let listener = opts.create_tokio().context("Failed to bind to socket")?;
    let (resp_tx, mut resp_rx) = mpsc::unbounded_channel::<TestingResponse>();

    let handle = Arc::new(Mutex::new(
        DaemonState::new(config, capabilities, resp_tx).await?,
    ));

    info!("Testing Daemon Ready");

    'server: loop {
        let res = tokio::select! {
            res = listener.accept() => {
                res
            },
            Ok(_) = tokio::signal::ctrl_c() => {
                break 'server;
            }
        };

        match res {
            Ok(stream) => {
                let mut recv = BufReader::new(&stream);
                let mut send = &stream;

                let mut buffer = String::with_capacity(256);

                loop {
                    tokio::select! {
                        Ok(_) = tokio::signal::ctrl_c() => {
                            break 'server;
                        }
                        res = recv.read_line(&mut buffer) => {
                            match res {
                                Ok(0) => {
                                    break;
                                }
                                Ok(_amnt) => {
                                    let parsed = serde_json::from_str::<TestingRequest>(&buffer);
                                    buffer.clear();
                                    let mut state = handle.lock().await;
                                    let outcome = match parsed {
                                        Ok(req) => state.process_req(req).await,
                                        Err(why) => Err(TestingResponse::Error(format!("Bad request: {why}"))),
                                    };
                                    state.push_resp(outcome.err().unwrap_or(TestingResponse::Complete));
                                }
                                Err(why) => {
                                    error!("Read Error: {why:?}");
                                    break;
                                }
                            }
                        }
                        Some(resp) = resp_rx.recv() => {
                            let encoded = resp.encode_line()?;
                            if let Err(why) = send.write_all(&encoded).await {
                                error!("Failed to send response: {why:?}");
                                break;
                            }
                        }
                    }
                }
            }
            Err(why) => error!("Error from connection: {why:?}"),
        }
    }

    handle.lock().await.service.stop_event_loop();

    Ok(())
}
