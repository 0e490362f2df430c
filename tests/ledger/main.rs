mod chain_test;
mod import_test;
