/// tiny module to init logging and save solution into file
pub mod logger;
