mod catalog;
mod db_files;
mod file;
mod heap_file;
mod page;
mod tuple;

pub use catalog::{Catalog, TableSchema};
pub use db_files::DBFiles;
pub use file::{File, FileMode, MemoryFile, PosixFile};
pub use heap_file::{DbFile, HeapFile, SharedPage};
pub use page::Page;
pub use tuple::Tuple;
