pub mod error;
pub mod signature;
pub mod strategy;
pub mod wire;


pub use error::{ErrorKind, Result, WirecallError};
pub use signature::{MethodSignature, TypeCode, WireArgs, WireType};
pub use strategy::{Fault, SerializationStrategy};
pub use wire::{CorrelationId, FrameBuilder, RequestHeader};
