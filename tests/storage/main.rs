mod kv_test;
