mod lifecycle_test;
mod retention_test;
