pub mod mutex_ext;
