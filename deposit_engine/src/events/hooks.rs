use std::{future::Future, pin::Pin, sync::Arc};

use log::*;

use crate::{
    events::{DepositSettledEvent, EventHandler, EventProducer, Handler},
    traits::CommissionAccounting,
};

#[derive(Default, Clone)]
pub struct EventProducers {
    pub deposit_settled_producer: Vec<EventProducer<DepositSettledEvent>>,
}

pub struct EventHandlers {
    pub on_deposit_settled: Vec<EventHandler<DepositSettledEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let on_deposit_settled =
            hooks.on_deposit_settled.into_iter().map(|f| EventHandler::new(buffer_size, f)).collect();
        Self { on_deposit_settled }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        for handler in &self.on_deposit_settled {
            result.deposit_settled_producer.push(handler.subscribe());
        }
        result
    }

    /// Spawns one task per handler. Each task ends once all of its producers have been dropped.
    pub fn start_handlers(self) -> Vec<tokio::task::JoinHandle<()>> {
        self.on_deposit_settled
            .into_iter()
            .map(|handler| tokio::spawn(async move { handler.start_handler().await }))
            .collect()
    }
}

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_deposit_settled: Vec<Handler<DepositSettledEvent>>,
}

impl EventHooks {
    /// Adds a handler for settled deposits. Every handler receives every event.
    pub fn on_deposit_settled<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(DepositSettledEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_deposit_settled.push(Arc::new(f));
        self
    }
}

/// Builds the handler that reports settled deposits to commission accounting.
///
/// Failures are logged and swallowed. Commission bookkeeping never affects a settlement.
pub fn commission_hook<C>(commission: C) -> impl Fn(DepositSettledEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>
where C: CommissionAccounting + 'static {
    let commission = Arc::new(commission);
    move |ev: DepositSettledEvent| {
        let commission = Arc::clone(&commission);
        Box::pin(async move {
            let request = ev.request;
            let result = commission
                .on_deposit_settled(request.user_id, request.amount, &request.platform, request.id, request.created_at)
                .await;
            match result {
                Ok(()) => debug!("📬️ Commission recorded for deposit request #{}", request.id),
                Err(e) => error!("📬️ Could not record commission for deposit request #{}. {e}", request.id),
            }
        }) as Pin<Box<dyn Future<Output = ()> + Send>>
    }
}
