//! Sessions de streaming neurofocus.
//!
//! Un [`registry::SessionRegistry`] crée des sessions, chacune servie par un
//! thread qui lit son device au rythme du tick, calcule les scores et les
//! diffuse à ses abonnés.

mod coordinator;
pub mod device;
pub mod error;
pub mod registry;
pub mod session;
pub mod store;
pub mod subscriber;

pub use device::{DeviceProvider, DeviceSource, SyntheticDevice, SyntheticProvider};
pub use error::{AcquisitionError, SessionError, SubscriberSendError};
pub use registry::SessionRegistry;
pub use session::{
    CoordinatorState, DropEvent, ScoreSample, SessionDescriptor, SessionId, SessionSnapshot,
    SessionStatus, TickRecord,
};
pub use store::{JsonDirStore, MemoryStore, SessionStore};
pub use subscriber::{ChannelSubscriber, Subscriber, SubscriberHandle};
