pub mod delivery;
pub mod error;
pub mod ordering;
pub mod restaurant;
pub mod runtime;

pub use delivery::{DeliveryEvents, DeliveryService};
pub use error::ServiceError;
pub use ordering::{OrderingService, StatusProjection};
pub use restaurant::{RestaurantEvents, RestaurantService};
pub use runtime::{ConsumerPlan, ServiceRuntime};
