pub mod client;
pub mod database;
pub mod memory;
pub mod store;

pub use client::DBClient;
pub use database::{
    Deposit, DepositUpdate, NewDeposit, Withdrawal, WithdrawalUpdate, WithdrawalWithDeposit,
};
pub use memory::{Fault, MemoryStore};
pub use store::{PairUpdate, PgStateStore, StateStore, StoreError};
