pub mod fetch_gateway;
pub mod header_rotation;
