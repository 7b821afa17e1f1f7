use std::sync::Arc;
use std::time::Duration;

use crate::config::{AddOnPolicy, Config};
use crate::gateway::{CyberSourceGateway, GatewayError, GatewayRegistry, QPayGateway};
use crate::notify::RefundNotifier;
use crate::services::{Reconciler, ReconcilerPolicy};
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub gateways: GatewayRegistry,
    pub reconciler: Arc<Reconciler>,
    pub add_on_policy: AddOnPolicy,
    pub gateway_timeout: Duration,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        gateways: GatewayRegistry,
        notifier: Arc<dyn RefundNotifier>,
        policy: ReconcilerPolicy,
        add_on_policy: AddOnPolicy,
    ) -> Self {
        let reconciler = Reconciler::new(store.clone(), gateways.clone(), notifier, policy);
        Self {
            store,
            gateways,
            reconciler: Arc::new(reconciler),
            add_on_policy,
            gateway_timeout: policy.gateway_timeout,
        }
    }

    pub fn from_config(
        config: &Config,
        store: Arc<dyn Store>,
        notifier: Arc<dyn RefundNotifier>,
    ) -> Result<Self, GatewayError> {
        let gateways = build_gateways(config)?;
        let policy = ReconcilerPolicy {
            missing_ref: config.missing_ref_policy,
            gateway_timeout: config.gateway_timeout,
        };
        Ok(Self::new(
            store,
            gateways,
            notifier,
            policy,
            config.add_on_policy,
        ))
    }
}

/// One adapter per gateway enabled in `config`.
pub fn build_gateways(config: &Config) -> Result<GatewayRegistry, GatewayError> {
    let mut gateways = GatewayRegistry::new();
    if let Some(qpay) = &config.qpay {
        gateways = gateways.with(Arc::new(QPayGateway::new(
            qpay.clone(),
            config.gateway_timeout,
        )?));
    }
    if let Some(cybersource) = &config.cybersource {
        gateways = gateways.with(Arc::new(CyberSourceGateway::new(
            cybersource.clone(),
            config.gateway_timeout,
        )?));
    }
    Ok(gateways)
}
