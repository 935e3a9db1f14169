//! Permission-checked CRUD service, search types, cascade walk, and CSV I/O.

pub mod cascade;
pub mod crud;
pub mod csv_io;
pub mod permission;
pub mod search;

pub use crud::CrudService;
