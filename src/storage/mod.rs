mod crud;
mod items;
mod pins;
mod resource;
mod schema;
mod subscriptions;
mod types;
mod values;

pub use resource::{Collection, Resource};
pub use schema::{Database, SCHEMA_VERSION};
pub use subscriptions::SubscriptionSort;
pub use types::{DatabaseError, Item, Pin, PinAction, Record, Subscription};
pub use values::{Direction, Filter, Query, Value, Values};
