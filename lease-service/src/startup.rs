use crate::config::LeaseConfig;
use crate::handlers;
use crate::services::providers::{
    BuildTrigger, CodeBuildTrigger, CredentialProvider, EmailSender, EventPublisher,
    MockEmailSender, SmtpEmailSender, SnsPublisher, SqsQueue, StsCredentialProvider, WorkQueue,
};
use crate::services::{
    BudgetEvaluator, BudgetNotifier, Clock, LeaseService, MongoStore, RecordStore,
    ResetQueueDrainer, SystemClock,
};
use aws_config::{BehaviorVersion, Region};
use axum::{
    http::{header, HeaderName, Method},
    middleware::from_fn,
    routing::{delete, get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{metrics_middleware, request_id_middleware, REQUEST_ID_HEADER};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// External collaborators the services are built from.
pub struct Adapters {
    pub store: Arc<dyn RecordStore>,
    pub reset_queue: Arc<dyn WorkQueue>,
    pub builds: Arc<dyn BuildTrigger>,
    pub publisher: Arc<dyn EventPublisher>,
    pub email: Arc<dyn EmailSender>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub leases: Arc<LeaseService>,
    pub budget: Arc<BudgetEvaluator>,
    pub reset_queue: Arc<ResetQueueDrainer>,
}

impl AppState {
    pub fn new(config: &LeaseConfig, adapters: Adapters) -> Self {
        let Adapters {
            store,
            reset_queue,
            builds,
            publisher,
            email,
            credentials,
            clock,
        } = adapters;

        let notifier = Arc::new(BudgetNotifier::new(email, config.notification.clone()));

        let leases = LeaseService::new(
            store.clone(),
            reset_queue.clone(),
            publisher.clone(),
            config.policy.clone(),
            config.aws.lease_events_topic_arn.clone(),
            clock.clone(),
        );
        let budget = BudgetEvaluator::new(
            store.clone(),
            credentials,
            reset_queue.clone(),
            publisher,
            notifier,
            config.policy.clone(),
            config.aws.lease_locked_topic_arn.clone(),
            clock.clone(),
        );
        let drainer = ResetQueueDrainer::new(
            store.clone(),
            reset_queue,
            builds,
            config.aws.reset_build_name.clone(),
            clock,
        );

        Self {
            store,
            leases: Arc::new(leases),
            budget: Arc::new(budget),
            reset_queue: Arc::new(drainer),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route(
            "/leases",
            post(handlers::create_lease).get(handlers::list_leases),
        )
        .route("/leases/budget-check", post(handlers::check_active_leases))
        .route(
            "/leases/:id",
            get(handlers::get_lease).delete(handlers::delete_lease),
        )
        .route("/leases/:id/budget-check", post(handlers::check_budget))
        .route("/accounts/:id/orphan", post(handlers::orphan_account))
        .route("/reset-queue/drain", post(handlers::drain_reset_queue))
        .route("/reset-queue/populate", post(handlers::populate_reset_queue))
        // Runs after routing so the matched path is available as a label.
        .route_layer(from_fn(metrics_middleware))
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(
            CorsLayer::new()
                .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, request_id.clone()])
                .expose_headers([request_id]),
        )
}

pub struct Application {
    port: u16,
    server: Box<dyn std::future::Future<Output = std::io::Result<()>> + Send + Unpin>,
    state: AppState,
}

impl Application {
    /// Connects to MongoDB and AWS, wires the services and binds the listener.
    pub async fn build(config: LeaseConfig) -> Result<Self, AppError> {
        let store = MongoStore::connect(&config.mongodb.uri, &config.mongodb.database)
            .await
            .map_err(|e| {
                tracing::error!("Failed to connect to MongoDB: {}", e);
                e
            })?;
        store.initialize_indexes().await.map_err(|e| {
            tracing::error!("Failed to initialize database indexes: {}", e);
            e
        })?;

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.aws.region.clone()))
            .load()
            .await;

        let email: Arc<dyn EmailSender> = if config.smtp.enabled {
            match SmtpEmailSender::new(&config.smtp) {
                Ok(sender) => {
                    tracing::info!("SMTP email sender initialized");
                    Arc::new(sender)
                }
                Err(e) => {
                    tracing::warn!("Failed to initialize SMTP sender: {}. Using mock.", e);
                    Arc::new(MockEmailSender::new())
                }
            }
        } else {
            tracing::info!("SMTP disabled, budget notifications go to the mock sender");
            Arc::new(MockEmailSender::new())
        };

        let adapters = Adapters {
            store: Arc::new(store),
            reset_queue: Arc::new(SqsQueue::new(
                aws_sdk_sqs::Client::new(&sdk_config),
                config.aws.reset_queue_url.clone(),
            )),
            builds: Arc::new(CodeBuildTrigger::new(aws_sdk_codebuild::Client::new(
                &sdk_config,
            ))),
            publisher: Arc::new(SnsPublisher::new(aws_sdk_sns::Client::new(&sdk_config))),
            email,
            credentials: Arc::new(StsCredentialProvider::new(sdk_config)),
            clock: Arc::new(SystemClock),
        };
        let state = AppState::new(&config, adapters);
        let app = build_router(state.clone());

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Listening on {}", port);

        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

        Ok(Self {
            port,
            server: Box::new(server.into_future()),
            state,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn http_port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.server.await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
