//! Hostname generators.

use rand::Rng;
use rand::RngCore;
use rand::seq::SliceRandom;

use crate::StencilError;
use crate::StencilResult;

const FIRST_NAMES: &[&str] = &[
	"abby", "addie", "alba", "alfonso", "alva", "amado", "anita", "armand", "aubrey", "bart",
	"benita", "bernie", "bettie", "blair", "boris", "brandi", "bruno", "calvin", "camila", "carey",
	"cecil", "celia", "chas", "clara", "cody", "connie", "dale", "darcy", "delia", "denis", "diana",
	"dolly", "edgar", "edna", "elias", "elvira", "emery", "enid", "ervin", "esther", "felix",
	"flora", "floyd", "freda", "gavin", "gilda", "glen", "greta", "hazel", "heath", "hilda",
	"homer", "ida", "ines", "isaac", "ivy", "jared", "joan", "jonas", "judy", "kirk", "lela",
	"lyle", "marta",
];

const LAST_NAMES: &[&str] = &[
	"abbott", "alcorn", "arenas", "babin", "barra", "bayles", "bedell", "bolden", "brandt",
	"buckner", "cagle", "calloway", "cantu", "casto", "coble", "corley", "crain", "darden",
	"debem", "delong", "dorsey", "dube", "eckert", "elam", "ennis", "farley", "feltus", "fenner",
	"fogle", "gaddis", "galvan", "gorman", "grubb", "hadley", "hanna", "hatch", "heller",
	"hinkle", "hurd", "jarvis", "keeler", "kemp", "lacey", "lamb", "landry", "lowe", "mabry",
	"marks", "maruyama", "mccue", "mott", "nagle", "noble", "orr", "pace", "pruitt", "quinn",
	"rector", "sager", "tate", "ulery", "vance", "weber", "yount",
];

/// Generate `n` random bytes as `2 * n` lowercase hex characters.
pub fn random_hex(n: usize) -> String {
	let mut bytes = vec![0_u8; n];
	rand::thread_rng().fill_bytes(&mut bytes);
	hex::encode(bytes)
}

/// A random `first-last` name suitable as a hostname.
pub fn random_name() -> String {
	let mut rng = rand::thread_rng();
	let first = FIRST_NAMES.choose(&mut rng).copied().unwrap_or("host");
	let last = LAST_NAMES.choose(&mut rng).copied().unwrap_or("name");
	let suffix: u16 = rng.gen_range(0..1000);
	if suffix < 900 {
		format!("{first}-{last}")
	} else {
		format!("{first}-{last}-{suffix}")
	}
}

/// Derive a hostname from a MAC address. The same MAC always yields the same
/// name: two first names followed by two last names.
pub fn mac_name(mac_address: &str) -> StencilResult<String> {
	let mac = parse_mac(mac_address)?;
	// Four table picks consume 24 bits, so fold the vendor half into the rest.
	let mut value = (mac >> 24) ^ (mac & 0x00FF_FFFF);
	let first_count = FIRST_NAMES.len() as u64;
	let last_count = LAST_NAMES.len() as u64;

	let mut parts = Vec::with_capacity(4);
	for (names, count) in [
		(FIRST_NAMES, first_count),
		(FIRST_NAMES, first_count),
		(LAST_NAMES, last_count),
		(LAST_NAMES, last_count),
	] {
		parts.push(names[(value % count) as usize]);
		value /= count;
	}

	Ok(parts.join("-"))
}

fn parse_mac(mac_address: &str) -> StencilResult<u64> {
	let invalid = || StencilError::InvalidMacAddress(mac_address.to_string());
	let trimmed = mac_address.trim();
	let digits: String = if trimmed.contains([':', '-']) {
		let octets: Vec<&str> = trimmed.split([':', '-']).collect();
		if octets.len() != 6 || octets.iter().any(|octet| octet.len() != 2) {
			return Err(invalid());
		}
		octets.concat()
	} else {
		trimmed.to_string()
	};

	if digits.len() != 12 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
		return Err(invalid());
	}

	u64::from_str_radix(&digits, 16).map_err(|_| invalid())
}
