//! Seed data for local development and demos.

pub mod dev_seeder;

pub use dev_seeder::{DevSeeder, DEV_PASSWORD};
