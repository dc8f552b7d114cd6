//! This module contains utilities that are useful for testing code against the server: an
//!  in-memory file store and a UDP capture socket playing the client side of the data path.
//!  They are used for testing the server itself, but they are also exported for application
//!  testing, which is why they are regular code rather than #[cfg(test)].

pub mod store;
pub mod udp;


#[cfg(test)]
mod tests {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::DEBUG)
            // .with_max_level(Level::TRACE)
            .try_init()
            .ok();
    }
}
