mod helpers;

mod election;
mod failures;
mod resolve;
