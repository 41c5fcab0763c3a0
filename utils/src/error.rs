use core::result;

/// The house error type: errors are logged where they occur, so by the
/// time a `Result` crosses a boundary the only thing left to carry is
/// the fact of the failure.
pub type Result<T = (), E = ()> = result::Result<T, E>;

pub trait LogErr<T, E> {
	/// Run `f` on the error (typically to log it), discarding it.
	fn ok_or_log(self, f: impl FnOnce(E)) -> Option<T>;
}

impl<T, E> LogErr<T, E> for result::Result<T, E> {
	fn ok_or_log(self, f: impl FnOnce(E)) -> Option<T> {
		match self {
			Ok(v) => Some(v),
			Err(e) => {
				f(e);
				None
			}
		}
	}
}

pub trait LogNone<T> {
	/// Run `f` when the option is empty, passing the option through.
	fn some_or_log(self, f: impl FnOnce()) -> Option<T>;
}

impl<T> LogNone<T> for Option<T> {
	fn some_or_log(self, f: impl FnOnce()) -> Option<T> {
		if self.is_none() {
			f();
		}

		self
	}
}
