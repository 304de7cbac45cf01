//! KML export of geolocated destination addresses.
use maxminddb::{geoip2, MaxMindDBError, Reader};
use std::collections::BTreeMap;
use std::fmt::{self, Write};
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use crate::analyser::containers::DestinationCount;
use crate::error::{AnalyserError, Result};

#[derive(Clone, Debug, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub country: Option<String>,
    pub city: Option<String>,
}

impl Location {
    /// Needs coordinates; country and city names are taken in English when present.
    fn from_city(city: &geoip2::City) -> Option<Self> {
        let location = city.location.as_ref()?;
        Some(Location {
            latitude: location.latitude?,
            longitude: location.longitude?,
            country: city.country.as_ref().and_then(|country| english(&country.names)),
            city: city.city.as_ref().and_then(|city| english(&city.names)),
        })
    }
}

fn english(names: &Option<BTreeMap<&str, &str>>) -> Option<String> {
    names.as_ref()?.get("en").map(|name| name.to_string())
}

/// Resolves an address to a place on the map.
pub trait Geolocate {
    fn locate(&self, address: Ipv4Addr) -> Option<Location>;
}

/// A MaxMind City database (`.mmdb`). The default value has no database and resolves nothing.
#[derive(Default)]
pub struct GeoDatabase {
    reader: Option<Reader<Vec<u8>>>,
}

impl GeoDatabase {
    pub fn open(path: &Path) -> Result<Self> {
        let reader = Reader::open_readfile(path).map_err(|e| AnalyserError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        log::info!("Opened geolocation database {}", path.display());
        Ok(Self { reader: Some(reader) })
    }
}

impl Geolocate for GeoDatabase {
    fn locate(&self, address: Ipv4Addr) -> Option<Location> {
        let reader = self.reader.as_ref()?;
        match reader.lookup::<geoip2::City>(IpAddr::V4(address)) {
            Ok(city) => Location::from_city(&city),
            Err(MaxMindDBError::AddressNotFoundError(_)) => None,
            Err(e) => {
                log::warn!("KML - Lookup of {address} failed: {e}");
                None
            }
        }
    }
}

/// Addresses that can never have a public location.
fn is_unroutable(address: Ipv4Addr) -> bool {
    address.is_private()
        || address.is_loopback()
        || address.is_link_local()
        || address.is_broadcast()
        || address.is_multicast()
        || address.is_unspecified()
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn write_placemark(kml: &mut String, destination: &DestinationCount, location: &Location) -> fmt::Result {
    let country = location.country.as_deref().unwrap_or("N/A");
    let city = location.city.as_deref().unwrap_or("N/A");

    writeln!(kml, "  <Placemark>")?;
    writeln!(kml, "    <name>{}</name>", destination.address)?;
    writeln!(
        kml,
        "    <description>Packets Sent : {}\nCountry : {}\nCity : {}</description>",
        destination.packets,
        xml_escape(country),
        xml_escape(city)
    )?;
    writeln!(
        kml,
        "    <Point><coordinates>{},{}</coordinates></Point>",
        location.longitude, location.latitude
    )?;
    writeln!(kml, "  </Placemark>")
}

/// Builds a KML document with one placemark per destination that resolves.
///
/// Unresolvable addresses are logged and left out.
pub fn generate_kml<G: Geolocate>(destinations: &[DestinationCount], database: &G) -> String {
    log::info!("Generating KML file");
    let mut kml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<kml xmlns=\"http://www.opengis.net/kml/2.2\">\n<Document>\n",
    );

    for destination in destinations {
        let address = destination.address;
        if is_unroutable(address) {
            log::error!("KML - Found unknown address {address} (probably private)");
            continue;
        }
        let location = match database.locate(address) {
            Some(location) => location,
            None => {
                log::error!("KML - No location known for {address}");
                continue;
            }
        };

        // Writing into a String cannot fail
        let _ = write_placemark(&mut kml, destination, &location);
    }

    kml.push_str("</Document>\n</kml>\n");
    kml
}
