//! Refresh of the local order queue against the broker.

use tracing::{debug, info};

use crate::api::{fetch_order_status, Broker};
use crate::error::{EngineError, EngineResult};
use crate::models::Order;

/// Re-query every queued order by its class tag, replace it with the fresh
/// record, and drop the ones that filled.
///
/// Returns whether any order completed. Orders in other states, cancelled
/// included, stay queued.
pub async fn reconcile_orders(orders: &mut Vec<Order>, broker: &dyn Broker) -> EngineResult<bool> {
    for order in orders.iter_mut() {
        let asset_class = order.asset_class.ok_or_else(|| {
            EngineError::DataContract(format!(
                "order {} for {} has no type tag",
                order.id, order.symbol
            ))
        })?;

        let fresh = fetch_order_status(broker, asset_class, &order.id).await?;
        if fresh.asset_class.is_none() {
            return Err(EngineError::DataContract(format!(
                "status for order {} came back without a type tag",
                fresh.id
            )));
        }

        debug!(id = %fresh.id, status = ?fresh.status, "Order status");
        *order = fresh;
    }

    let before = orders.len();
    orders.retain(|o| {
        if o.is_filled() {
            info!(
                id = %o.id,
                symbol = %o.symbol,
                side = o.side.as_str(),
                price = ?o.filled_price,
                "Order filled"
            );
        }
        !o.is_filled()
    });

    Ok(orders.len() != before)
}
