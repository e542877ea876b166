pub mod randomuser;

pub use randomuser::RandomUserApi;
