pub mod address;
pub mod choice_map;
pub mod gfi;
pub mod value;
