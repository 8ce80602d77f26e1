//! # Models
//!
//! Data types shared by the store, the collaborators and the reconcile pass.

pub mod condition;
pub mod heat;
pub mod object;

pub use condition::{reasons, Condition, ConditionSet, ConditionStatus, ConditionType};
pub use heat::{HeatInstance, HeatSpec, HeatStatus, ResourceRequirements, SubComponent, SubComponentSpec};
pub use object::{ObjectKey, ObjectKind, ObjectMeta, StoredObject};
