use crate::error::ConnectionError;

/// Outbound half of a connection.
///
/// Writes are fire-and-forget from the engine's point of view; reading is
/// driven by whoever owns the socket and feeds bytes into the connection.
#[cfg_attr(test, mockall::automock)]
pub trait XmppTransport: Send + 'static {
    fn write(&mut self, data: &[u8]) -> Result<(), ConnectionError>;

    fn close(&mut self) -> Result<(), ConnectionError>;
}

impl<T: XmppTransport + ?Sized> XmppTransport for Box<T> {
    fn write(&mut self, data: &[u8]) -> Result<(), ConnectionError> {
        (**self).write(data)
    }

    fn close(&mut self) -> Result<(), ConnectionError> {
        (**self).close()
    }
}
