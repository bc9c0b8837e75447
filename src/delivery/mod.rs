//! Asynchronous result delivery into the game world.
//!
//! - [`registry`] maps (object, NPC) pairs to a callback URL and bearer token.
//! - [`worker`] runs turns off the request path on a bounded worker pool.
//! - [`codec`] is the pipe-delimited wire format the in-world decoder reads.
//! - [`package_cache`] holds oversized packages for `/sl/fetch`.
//! - [`callback`] performs the outbound POST.

pub mod callback;
pub mod codec;
pub mod package_cache;
pub mod registry;
pub mod worker;

pub use callback::{CallbackClient, DeliveryError};
pub use codec::{CodecError, FetchPackage, Package, ResultPackage, WireRecord};
pub use package_cache::PackageCache;
pub use registry::{CallbackRegistration, CallbackRegistry, IssuedToken, RegistryError};
pub use worker::{
    merge_actions, run_quest_turn, start_dispatcher, DispatchError, DispatcherHandle, JobContext,
    QuestTurn, TurnJob,
};
