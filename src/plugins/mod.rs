pub mod approval;
pub mod condition;
pub mod gate;
pub mod metadata;
pub mod rules;
