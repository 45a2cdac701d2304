//! GATT Service Discovery
//!
//! Obtains the service tree of a connected peripheral. Stacks expose services
//! in different ways, so discovery runs an ordered list of strategies and
//! takes the first non-empty result.

use crate::domain::error::{BleError, StackError};
use crate::domain::models::ServiceTree;
use crate::infrastructure::bluetooth::stack::GattConnection;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub enum StrategyOutcome {
    Resolved(ServiceTree),
    Empty,
    NotApplicable,
    Failed(StackError),
}

#[async_trait]
pub trait ResolveStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn attempt(&self, link: &dyn GattConnection) -> StrategyOutcome;
}

/// Live discovery through the stack's asynchronous call
pub struct DiscoverServices;

#[async_trait]
impl ResolveStrategy for DiscoverServices {
    fn name(&self) -> &'static str {
        "discover"
    }

    async fn attempt(&self, link: &dyn GattConnection) -> StrategyOutcome {
        if !link.capabilities().service_discovery {
            return StrategyOutcome::NotApplicable;
        }
        match link.discover_services().await {
            Ok(tree) if tree.is_empty() => StrategyOutcome::Empty,
            Ok(tree) => StrategyOutcome::Resolved(tree),
            Err(e) => StrategyOutcome::Failed(e),
        }
    }
}

/// Services the stack populated while connecting
pub struct CachedServices;

#[async_trait]
impl ResolveStrategy for CachedServices {
    fn name(&self) -> &'static str {
        "cached"
    }

    async fn attempt(&self, link: &dyn GattConnection) -> StrategyOutcome {
        if !link.capabilities().cached_services {
            return StrategyOutcome::NotApplicable;
        }
        match link.cached_services() {
            Some(tree) if !tree.is_empty() => StrategyOutcome::Resolved(tree),
            _ => StrategyOutcome::Empty,
        }
    }
}

pub struct ServiceResolver {
    strategies: Vec<Box<dyn ResolveStrategy>>,
    timeout: Duration,
}

impl ServiceResolver {
    /// Live discovery first, then the cached services
    pub fn new(timeout: Duration) -> Self {
        Self::with_strategies(vec![Box::new(DiscoverServices), Box::new(CachedServices)], timeout)
    }

    pub fn with_strategies(strategies: Vec<Box<dyn ResolveStrategy>>, timeout: Duration) -> Self {
        Self {
            strategies,
            timeout,
        }
    }

    /// Run each strategy in order until one yields a non-empty tree.
    ///
    /// Stack errors are logged and folded into
    /// [`BleError::ServicesUnavailable`].
    pub async fn resolve(&self, link: &dyn GattConnection) -> Result<ServiceTree, BleError> {
        let mut attempts = Vec::with_capacity(self.strategies.len());

        for strategy in &self.strategies {
            let name = strategy.name();
            let outcome = tokio::time::timeout(self.timeout, strategy.attempt(link))
                .await
                .unwrap_or(StrategyOutcome::Failed(StackError::Timeout(self.timeout)));

            match outcome {
                StrategyOutcome::Resolved(tree) => {
                    info!(
                        "Resolved {} service(s) via '{}' strategy",
                        tree.services.len(),
                        name
                    );
                    return Ok(tree);
                }
                StrategyOutcome::Empty => {
                    debug!("Service strategy '{}' returned nothing", name);
                    attempts.push(format!("{}: empty", name));
                }
                StrategyOutcome::NotApplicable => {
                    debug!("Service strategy '{}' not supported by this stack", name);
                    attempts.push(format!("{}: not supported", name));
                }
                StrategyOutcome::Failed(e) => {
                    warn!("Service strategy '{}' failed: {}", name, e);
                    attempts.push(format!("{}: failed", name));
                }
            }
        }

        Err(BleError::ServicesUnavailable { attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{CharProperty, Characteristic, Service};
    use crate::infrastructure::bluetooth::mock::{notify_tree, MockPeripheral, MockStack};
    use crate::infrastructure::bluetooth::stack::Capabilities;
    use uuid::Uuid;

    const TIMEOUT: Duration = Duration::from_secs(5);

    async fn resolve_with(peripheral: MockPeripheral) -> Result<ServiceTree, BleError> {
        let stack = MockStack::with_peripheral(Vec::new(), peripheral);
        let link = stack.connection("addr1");
        ServiceResolver::new(TIMEOUT).resolve(link.as_ref()).await
    }

    #[tokio::test]
    async fn test_falls_back_to_cached_services() {
        let peripheral = MockPeripheral {
            discovered: Err(StackError::Other("org.bluez.Error.Failed".into())),
            cached: Some(notify_tree()),
            ..MockPeripheral::default()
        };
        let stack = MockStack::with_peripheral(Vec::new(), peripheral);
        let link = stack.connection("addr1");

        let tree = ServiceResolver::new(TIMEOUT).resolve(link.as_ref()).await;
        assert_eq!(tree.unwrap(), notify_tree());
        assert_eq!(stack.control.discovers(), 1);
    }

    #[tokio::test]
    async fn test_discovery_preferred_over_cache() {
        let stale = ServiceTree::new(vec![Service {
            uuid: Uuid::from_u128(1),
            characteristics: vec![Characteristic {
                uuid: Uuid::from_u128(2),
                properties: [CharProperty::Read].into(),
                descriptors: Vec::new(),
            }],
        }]);
        let peripheral = MockPeripheral {
            cached: Some(stale),
            ..MockPeripheral::default()
        };
        assert_eq!(resolve_with(peripheral).await.unwrap(), notify_tree());
    }

    #[tokio::test]
    async fn test_empty_discovery_falls_through() {
        let peripheral = MockPeripheral {
            discovered: Ok(ServiceTree::default()),
            ..MockPeripheral::default()
        };
        assert_eq!(resolve_with(peripheral).await.unwrap(), notify_tree());
    }

    #[tokio::test]
    async fn test_neither_path_available() {
        let peripheral = MockPeripheral {
            capabilities: Capabilities {
                service_discovery: true,
                cached_services: false,
            },
            discovered: Err(StackError::Other("org.bluez.Error.Failed".into())),
            cached: None,
            ..MockPeripheral::default()
        };

        let err = resolve_with(peripheral).await.unwrap_err();
        assert!(matches!(err, BleError::ServicesUnavailable { .. }));
        assert!(!err.to_string().contains("org.bluez"));
    }

    #[tokio::test]
    async fn test_no_capabilities() {
        let peripheral = MockPeripheral {
            capabilities: Capabilities::default(),
            ..MockPeripheral::default()
        };
        match resolve_with(peripheral).await {
            Err(BleError::ServicesUnavailable { attempts }) => {
                assert_eq!(attempts, vec!["discover: not supported", "cached: not supported"]);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_discovery_times_out() {
        let peripheral = MockPeripheral {
            discover_delay: Some(Duration::from_secs(3600)),
            ..MockPeripheral::default()
        };
        assert_eq!(resolve_with(peripheral).await.unwrap(), notify_tree());
    }
}
