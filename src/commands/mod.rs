pub mod brew;
pub mod info;
pub mod install;
pub mod maintenance;
pub mod regex_utils;
pub mod runner;
pub mod tap;
pub mod uninstall;
pub mod update;
pub mod views;
