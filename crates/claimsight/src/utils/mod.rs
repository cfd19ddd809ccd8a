pub mod deadline;
pub mod time;
