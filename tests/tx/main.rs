mod validator_test;
