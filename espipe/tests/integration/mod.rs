mod controller_test;
mod indexer_test;
mod support;
