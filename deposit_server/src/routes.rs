//! Request handler definitions
//!
//! Define each route and it handler here.
//! Handlers that are more than a line or two MUST go into a separate module. Keep this module neat and tidy 🙏
//!
//! A note about performance:
//! Since each worker thread processes its requests sequentially, handlers which block the current thread will cause the
//! current worker to stop processing new requests. A settlement spends most of its time waiting on the casino gateway,
//! so the handlers below are all `async` and only ever await the engine.
use actix_web::{get, web, HttpResponse, Responder};
use deposit_engine::{
    lock_coordinator::LockError,
    traits::{LedgerStore, SettlementGateway},
    SettlementFlowApi,
    SettlementOutcome,
    SkipReason,
};
use log::*;

use crate::{data_objects::SettlementResponse, errors::ServerError};

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+) => {
        paste::paste! { pub struct [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ >( $( core::marker::PhantomData<fn() -> [< T $bounds:camel> ] >,)+ );}
        paste::paste! { impl< $( [< T $bounds:camel> ],)+ > [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ > {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($( core::marker::PhantomData::<fn() -> [< T $bounds:camel> ] >,)+)
            }
        }}
        paste::paste! { impl<$( [< T $bounds:camel >] , )+> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<$([<T $bounds:camel>],)+>
        where
            $([<T $bounds:camel>]: $bounds + 'static,)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::< $( [< T $bounds:camel >], )+>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

//----------------------------------------------   Payments  ----------------------------------------------------
route!(process_payment => Post "/payments/{id}/process" impl LedgerStore, SettlementGateway);
/// Route handler for the payment trigger
///
/// The ingestion side calls this as soon as it has stored an incoming payment. It runs the settlement flow for the
/// payment and reports the outcome. Calling it again for the same payment is harmless: every repeat comes back as
/// `skipped`.
///
/// A gateway failure is reported as `502 Bad Gateway`. The failure has been recorded on the deposit request by then,
/// and it is up to an operator to take it further.
///
/// The flow runs on its own task. Actix drops the handler when the client hangs up, and the settlement must still
/// finish once the credit has gone out.
pub async fn process_payment<B: LedgerStore, G: SettlementGateway + 'static>(
    path: web::Path<i64>,
    api: web::Data<SettlementFlowApi<B, G>>,
) -> Result<HttpResponse, ServerError> {
    let payment_id = path.into_inner();
    debug!("💻️ POST process payment #{payment_id}");
    let outcome = api.into_inner().spawn_settlement(payment_id).await.map_err(|e| {
        error!("💻️ The settlement task for payment #{payment_id} did not finish. {e}");
        ServerError::Unspecified(format!("Settlement of payment #{payment_id} was interrupted"))
    })??;
    if let SettlementOutcome::Skipped(SkipReason::Lock(LockError::NotFound(id))) = outcome {
        return Err(ServerError::NoRecordFound(format!("Payment #{id} does not exist")));
    }
    Ok(HttpResponse::Ok().json(SettlementResponse::from(outcome)))
}
