mod decision;
mod execute;
mod finalize;
mod negotiate;
mod pay;
mod plan;
mod settle;
mod verify;
