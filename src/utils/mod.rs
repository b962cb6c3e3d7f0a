pub mod indexed;
pub mod paint;
