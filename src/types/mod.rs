pub mod date_key;
pub mod geo_point;
pub mod prediction;
pub mod sample;
pub mod variable;
