pub mod columns;
pub mod rows;
pub mod tables;
