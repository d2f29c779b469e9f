//! Модуль, содержащий исполнительные среды (бэкенды) для ASG.

pub mod backend;
pub mod cpu_backend;
