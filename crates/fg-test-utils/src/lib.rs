// fg-test-utils: In-process doubles for the gateway's external collaborators.
//
// `MockUpstream` stands in for the crawler actor's event-stream endpoint;
// `MockAlertServer` stands in for Telegram / Discord / webhook receivers.
// Both bind to port 0 so every test gets an isolated instance.

pub mod mock_alert_server;
pub mod mock_upstream;

pub use mock_alert_server::{MockAlertServer, RecordedRequest};
pub use mock_upstream::{ConnectionRecord, MockUpstream};
