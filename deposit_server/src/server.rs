use std::{sync::Arc, time::Duration};

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use deposit_engine::{
    clock::{Clock, SystemClock},
    events::{commission_hook, EventHandlers, EventHooks, EventProducers},
    notifications::notification_hook,
    SettlementFlowApi,
    SqliteDatabase,
};
use log::*;

use crate::{
    config::ServerConfig,
    errors::ServerError,
    integrations::{CasinoGatewayClient, LoggingCommission, TelegramNotifier},
    reconciliation_worker::start_reconciliation_worker,
    routes::{health, ProcessPaymentRoute},
};

const EVENT_BUFFER_SIZE: usize = 128;

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, config.max_db_connections)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    db.migrate().await.map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let gateway = CasinoGatewayClient::new(&config.casino, config.settlement.gateway_timeout)?;
    let hooks = create_event_hooks(&config, &db)?;
    let handlers = EventHandlers::new(EVENT_BUFFER_SIZE, hooks);
    let producers = handlers.producers();
    // The handler tasks live as long as any producer does, i.e. for the lifetime of the server
    let _handler_tasks = handlers.start_handlers();
    if config.polling.enabled {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let api = SettlementFlowApi::new(
            db.clone(),
            gateway.clone(),
            Arc::clone(&clock),
            config.settlement,
            producers.clone(),
        );
        let _worker = start_reconciliation_worker(api, clock, config.polling);
    }
    let srv = create_server_instance(config, db, gateway, producers)?;
    srv.await.map_err(|e| ServerError::Unspecified(e.to_string()))
}

/// Wires the side effects of a settlement: commission accounting always, user notifications when Telegram is set up.
pub fn create_event_hooks(config: &ServerConfig, db: &SqliteDatabase) -> Result<EventHooks, ServerError> {
    let mut hooks = EventHooks::default();
    hooks.on_deposit_settled(commission_hook(LoggingCommission));
    if config.telegram.is_usable() {
        let notifier = TelegramNotifier::new(&config.telegram)?;
        hooks.on_deposit_settled(notification_hook(
            db.clone(),
            SystemClock,
            config.settlement.lock_config,
            config.settlement.notification_delays,
            notifier,
        ));
        info!("📬️ Users will be notified through Telegram when their deposits land");
    } else {
        info!("📬️ User notifications are switched off");
    }
    Ok(hooks)
}

pub fn create_server_instance(
    config: ServerConfig,
    db: SqliteDatabase,
    gateway: CasinoGatewayClient,
    producers: EventProducers,
) -> Result<Server, ServerError> {
    let settlement = config.settlement;
    let srv = HttpServer::new(move || {
        let api = SettlementFlowApi::new(
            db.clone(),
            gateway.clone(),
            Arc::new(SystemClock),
            settlement,
            producers.clone(),
        );
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("dre::access_log"))
            .app_data(web::Data::new(api))
            .service(health)
            .service(ProcessPaymentRoute::<SqliteDatabase, CasinoGatewayClient>::new())
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((config.host.as_str(), config.port))?
    .run();
    Ok(srv)
}
