pub mod exposed_api;
