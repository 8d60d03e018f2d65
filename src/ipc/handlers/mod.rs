pub mod archive;
pub mod core;
pub mod courses;
pub mod grading;
pub mod marks;
pub mod students;
