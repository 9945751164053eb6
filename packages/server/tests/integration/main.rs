mod common;
mod health;
mod submission;
