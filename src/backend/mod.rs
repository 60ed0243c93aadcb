//! WiFi backend abstraction layer

pub mod airport_backend;
pub mod channel;
pub mod command;
pub mod mock_backend;
pub mod netsh_backend;
pub mod nmcli_backend;
pub mod wifi_backend;
pub mod wifi_ctrl_backend;

pub use airport_backend::AirportBackend;
pub use command::{CommandOutput, CommandRunner, SystemRunner};
pub use mock_backend::MockWifiBackend;
pub use netsh_backend::NetshBackend;
pub use nmcli_backend::NmcliBackend;
pub use wifi_backend::WifiBackend;
pub use wifi_ctrl_backend::WifiCtrlBackend;
