pub mod line;
pub mod webhook;

pub use line::{LineClient, LineNotifier};
pub use webhook::{router, WebhookState};
