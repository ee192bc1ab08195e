pub mod mock;
pub mod notifier;
pub mod observability;
pub mod persistence;

pub use mock::{MockBroker, MockQuoteSource};
pub use notifier::WebhookNotifier;
pub use persistence::Database;
