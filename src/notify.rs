use crate::models::OrderWithItems;

/// Receives order lifecycle events after they are committed. Real-time
/// delivery to browsers or staff devices lives behind this trait.
pub trait OrderNotifier: Send + Sync {
    fn order_placed(&self, order: &OrderWithItems);
    fn order_updated(&self, order: &OrderWithItems);
}

/// Writes events to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl OrderNotifier for LogNotifier {
    fn order_placed(&self, order: &OrderWithItems) {
        tracing::info!(
            order_id = order.order.id,
            order_number = %order.order.order_number,
            restaurant_id = order.order.restaurant_id,
            total_amount = order.order.total_amount,
            "order placed"
        );
    }

    fn order_updated(&self, order: &OrderWithItems) {
        tracing::info!(
            order_id = order.order.id,
            order_number = %order.order.order_number,
            status = %order.order.status,
            "order updated"
        );
    }
}
