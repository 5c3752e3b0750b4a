//! MQTT side of the bridge: topic codec and the rumqttc transport task.

pub mod codec;
pub mod transport;

pub use codec::{InboundMessage, TopicCodec};
pub use transport::{MqttPublisher, MqttTransport};
