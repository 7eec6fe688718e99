mod stop_signal;
mod ticker;
mod time;

#[cfg(test)]
mod test_utils;

pub(crate) use stop_signal::new as new_stop_signal;
pub(crate) use stop_signal::StopCheck;
pub(crate) use stop_signal::Stopper;
pub(crate) use ticker::Tick;
pub(crate) use ticker::TickerTask;
