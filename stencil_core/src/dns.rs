//! Time-bounded DNS lookups for the `dns_lookup` macro.

use std::collections::BTreeMap;
use std::fs;
use std::net::IpAddr;
use std::net::ToSocketAddrs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::BoxError;
use crate::StencilError;
use crate::StencilResult;

pub trait DnsResolver: Send + Sync {
	/// Name registered for an address.
	fn reverse(&self, address: IpAddr) -> Result<String, BoxError>;
	/// First address registered for a name.
	fn forward(&self, name: &str) -> Result<IpAddr, BoxError>;
}

/// Resolver backed by the operating system. Both directions go through the
/// system resolver (`getnameinfo` and `getaddrinfo`). Entries in the
/// override table answer first.
#[derive(Debug, Clone, Default)]
pub struct SystemResolver {
	overrides: BTreeMap<IpAddr, String>,
}

impl SystemResolver {
	pub fn new() -> Self {
		Self::default()
	}

	/// Override entries read from a file in `hosts(5)` syntax.
	pub fn from_hosts_file(path: &Path) -> StencilResult<Self> {
		let content = fs::read_to_string(path)?;
		Ok(Self::from_hosts(&content))
	}

	/// Parse `hosts(5)` syntax into override entries. The first name on a
	/// line wins; earlier lines win over later ones.
	pub fn from_hosts(content: &str) -> Self {
		let mut overrides = BTreeMap::new();
		for line in content.lines() {
			let line = line.split('#').next().unwrap_or_default();
			let mut fields = line.split_whitespace();
			let (Some(address), Some(name)) = (fields.next(), fields.next()) else {
				continue;
			};
			let Ok(address) = address.parse::<IpAddr>() else {
				continue;
			};
			overrides.entry(address).or_insert_with(|| name.to_string());
		}

		Self { overrides }
	}
}

impl DnsResolver for SystemResolver {
	fn reverse(&self, address: IpAddr) -> Result<String, BoxError> {
		if let Some(name) = self.overrides.get(&address) {
			return Ok(name.clone());
		}

		let name = dns_lookup::lookup_addr(&address)?;
		// `getnameinfo` falls back to the numeric form when no name exists.
		if name.parse::<IpAddr>().is_ok() {
			return Err(format!("no PTR record for {address}").into());
		}

		Ok(name)
	}

	fn forward(&self, name: &str) -> Result<IpAddr, BoxError> {
		if let Some((address, _)) = self.overrides.iter().find(|(_, entry)| *entry == name) {
			return Ok(*address);
		}

		(name, 0)
			.to_socket_addrs()?
			.next()
			.map(|socket| socket.ip())
			.ok_or_else(|| format!("no address record for {name}").into())
	}
}

/// Upper bound on lookups whose worker is still blocked after its caller
/// timed out.
pub const MAX_PENDING_LOOKUPS: usize = 4;

/// Counts unfinished lookup workers. Clones share the count.
#[derive(Debug, Clone)]
pub struct PendingLookups {
	count: Arc<AtomicUsize>,
	limit: usize,
}

impl Default for PendingLookups {
	fn default() -> Self {
		Self::new(MAX_PENDING_LOOKUPS)
	}
}

impl PendingLookups {
	pub fn new(limit: usize) -> Self {
		Self {
			count: Arc::new(AtomicUsize::new(0)),
			limit,
		}
	}

	pub fn count(&self) -> usize {
		self.count.load(Ordering::Acquire)
	}

	fn acquire(&self) -> Option<PendingGuard> {
		self.count
			.fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
				(count < self.limit).then_some(count + 1)
			})
			.ok()
			.map(|_| PendingGuard(self.count.clone()))
	}
}

/// Released when the worker finishes, answered or not.
struct PendingGuard(Arc<AtomicUsize>);

impl Drop for PendingGuard {
	fn drop(&mut self) {
		self.0.fetch_sub(1, Ordering::AcqRel);
	}
}

/// Resolve `query` in reverse when it parses as an address, forward
/// otherwise. Gives up after `timeout`, and refuses to start while
/// `pending` is at its limit. Failures are logged and returned.
pub fn lookup_with_timeout(
	resolver: Arc<dyn DnsResolver>,
	query: &str,
	timeout: Duration,
	pending: &PendingLookups,
) -> StencilResult<String> {
	let Some(guard) = pending.acquire() else {
		let error = StencilError::DnsResolution {
			query: query.to_string(),
			reason: format!("{} earlier lookups are still pending", pending.limit),
		};
		warn!(query, %error, "dns lookup failed");
		return Err(error);
	};

	let (sender, receiver) = mpsc::channel();
	let target = query.to_string();
	thread::spawn(move || {
		let result = match target.parse::<IpAddr>() {
			Ok(address) => resolver.reverse(address),
			Err(_) => resolver.forward(&target).map(|address| address.to_string()),
		};
		drop(guard);
		let _ = sender.send(result.map_err(|error| error.to_string()));
	});

	let error = match receiver.recv_timeout(timeout) {
		Ok(Ok(answer)) => return Ok(answer),
		Ok(Err(reason)) => {
			StencilError::DnsResolution {
				query: query.to_string(),
				reason,
			}
		}
		Err(mpsc::RecvTimeoutError::Timeout) => {
			StencilError::DnsTimeout {
				query: query.to_string(),
				timeout_ms: timeout.as_millis(),
			}
		}
		Err(mpsc::RecvTimeoutError::Disconnected) => {
			StencilError::DnsResolution {
				query: query.to_string(),
				reason: "resolver exited without an answer".to_string(),
			}
		}
	};

	warn!(query, %error, "dns lookup failed");
	Err(error)
}
