pub mod agent;
pub mod concept;
pub mod feedback;
pub mod generic_types;
pub mod llm_client;
pub mod mode;
pub mod persona;
pub mod session;
