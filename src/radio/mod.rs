mod btleplug_backend;
mod fake_backend;
mod transport;

pub use self::btleplug_backend::BtleplugRadio;
pub use self::fake_backend::{
    FakeOperation, FakeRadio, FakeRadioConfig, NotificationPayloads, ScanFixture,
};
pub(crate) use self::transport::ListenerTable;
pub use self::transport::{
    Advertisement, EventKind, EventSink, ListenerId, RadioEvent, RadioTransport, ScanRequest,
    SessionConfig,
};
