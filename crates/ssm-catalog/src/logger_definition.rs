//! Vendor Logger Definition Parser
//!
//! Reads the SSM protocol section of a RomRaider-style logger definition:
//!
//! - `parameters/parameter`: generic parameters, gated on an
//!   `ecubyteindex`/`ecubit` capability pair
//! - `ecuparams/ecuparam`: ROM-specific variants, each `ecu` block listing
//!   the ROM IDs it applies to and carrying its own address
//! - `switches/switch`: single bits addressed by `byte`/`bit`
//!
//! Every entry is also filtered by its `target` attribute (1 = ECU,
//! 2 = TCU, 3 = both; default 1). Malformed entries are logged and skipped.

use crate::catalog::ParameterCatalog;
use crate::error::CatalogError;
use crate::loader::AssetLoader;
use roxmltree::{Document, Node, ParsingOptions};
use ssm_protocol::{DisplayUnit, EcuCapabilityMask, ParameterDefinition, StorageType, Target};
use tracing::{debug, warn};

const SSM_PROTOCOL_ID: &str = "SSM";

/// Parse a logger definition.
///
/// With `capabilities` absent every generic parameter and switch is kept
/// and ROM-specific entries are skipped, since there is no ROM ID to match.
pub fn parse_logger_definition(
    xml: &str,
    capabilities: Option<&EcuCapabilityMask>,
    target: Target,
) -> Result<Vec<ParameterDefinition>, CatalogError> {
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    let document = Document::parse_with_options(xml, options)?;

    let rom_id = match capabilities.map(EcuCapabilityMask::rom_id) {
        Some(Ok(rom_id)) => Some(rom_id),
        Some(Err(e)) => {
            warn!("No ROM ID available, skipping ECU-specific parameters: {}", e);
            None
        }
        None => None,
    };

    let filter = EntryFilter {
        capabilities,
        target,
    };
    let mut parameters = Vec::new();

    let protocols = document
        .descendants()
        .filter(|n| n.has_tag_name("protocol") && n.attribute("id") == Some(SSM_PROTOCOL_ID));

    for protocol in protocols {
        for node in section_entries(protocol, "parameters", "parameter") {
            parameters.extend(filter.parameter(node));
        }
        if let Some(rom_id) = rom_id.as_deref() {
            for node in section_entries(protocol, "ecuparams", "ecuparam") {
                parameters.extend(filter.ecu_parameter(node, rom_id));
            }
        }
        for node in section_entries(protocol, "switches", "switch") {
            parameters.extend(filter.switch(node));
        }
    }

    debug!("Parsed {} parameters from logger definition", parameters.len());
    Ok(parameters)
}

/// Load a logger definition through `loader` and build a catalog from it
pub fn load_logger_definition(
    loader: &dyn AssetLoader,
    name: &str,
    capabilities: Option<&EcuCapabilityMask>,
    target: Target,
) -> Result<ParameterCatalog<ParameterDefinition>, CatalogError> {
    let xml = loader.read_to_string(name)?;
    let parameters = parse_logger_definition(&xml, capabilities, target)?;
    Ok(ParameterCatalog::from_entries(parameters))
}

/// Direct `entry` children of every `section` element under `protocol`
fn section_entries<'a, 'input: 'a>(
    protocol: Node<'a, 'input>,
    section: &'static str,
    entry: &'static str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    protocol
        .descendants()
        .filter(move |n| n.has_tag_name(section))
        .flat_map(move |s| s.children().filter(move |n| n.has_tag_name(entry)))
}

struct EntryFilter<'m> {
    capabilities: Option<&'m EcuCapabilityMask>,
    target: Target,
}

/// Identity attributes shared by every entry kind
struct Header<'a> {
    id: &'a str,
    name: &'a str,
}

/// First `conversion` element of an entry
struct Conversion {
    expression: String,
    unit: DisplayUnit,
    storage_type: Option<StorageType>,
}

impl<'m> EntryFilter<'m> {
    fn parameter(&self, node: Node) -> Option<ParameterDefinition> {
        let header = self.header(node)?;
        if !self.supported(&header, node.attribute("ecubyteindex"), node.attribute("ecubit")) {
            return None;
        }

        let (address, length) = match first_child(node, "address").map(parse_address) {
            Some(Some(address)) => address,
            Some(None) => {
                warn!("Parameter {} ({}) has an unparsable address", header.id, header.name);
                return None;
            }
            None => {
                warn!("Parameter {} ({}) missing address", header.id, header.name);
                return None;
            }
        };

        let Some(conversion) = conversion(node) else {
            warn!("Parameter {} ({}) missing expression", header.id, header.name);
            return None;
        };

        build(&header, address, length, conversion)
    }

    fn ecu_parameter(&self, node: Node, rom_id: &str) -> Option<ParameterDefinition> {
        let header = self.header(node)?;

        let ecu = node.descendants().filter(|n| n.has_tag_name("ecu")).find(|ecu| {
            ecu.attribute("id")
                .unwrap_or_default()
                .split(',')
                .any(|id| id.trim().eq_ignore_ascii_case(rom_id))
        });
        let Some(ecu) = ecu else {
            debug!("ECU parameter {} ({}) not defined for ROM {}", header.id, header.name, rom_id);
            return None;
        };

        let Some((address, length)) = first_child(ecu, "address").and_then(parse_address) else {
            warn!("ECU parameter {} ({}) missing address for ROM {}", header.id, header.name, rom_id);
            return None;
        };

        let Some(conversion) = conversion(node) else {
            warn!("ECU parameter {} ({}) missing expression", header.id, header.name);
            return None;
        };

        build(&header, address, length, conversion)
    }

    fn switch(&self, node: Node) -> Option<ParameterDefinition> {
        let header = self.header(node)?;
        // `bit` is both the capability bit and the value bit
        let bit_attr = node.attribute("bit");
        if !self.supported(&header, node.attribute("ecubyteindex"), bit_attr) {
            return None;
        }

        let Some(address) = node.attribute("byte").and_then(parse_hex) else {
            warn!("Switch {} ({}) missing byte address", header.id, header.name);
            return None;
        };
        let bit = bit_attr.and_then(|b| b.trim().parse::<u8>().ok()).unwrap_or(0);

        match ParameterDefinition::switch(header.id, header.name, address, bit) {
            Ok(definition) => Some(definition),
            Err(e) => {
                warn!("Switch {} ({}) skipped: {}", header.id, header.name, e);
                None
            }
        }
    }

    /// Required identity plus the target filter
    fn header<'a>(&self, node: Node<'a, '_>) -> Option<Header<'a>> {
        let id = node.attribute("id").filter(|s| !s.is_empty());
        let name = node.attribute("name").filter(|s| !s.is_empty());
        let (Some(id), Some(name)) = (id, name) else {
            warn!("Skipping <{}> without id or name", node.tag_name().name());
            return None;
        };

        let declared = node
            .attribute("target")
            .and_then(|t| t.trim().parse::<u8>().ok())
            .and_then(Target::from_code)
            .unwrap_or(Target::Ecu);
        if !declared.accepts(self.target) {
            return None;
        }

        Some(Header { id, name })
    }

    /// Capability gate. Entries without a gate, or parsed without a mask,
    /// are always supported.
    fn supported(&self, header: &Header, byte_index: Option<&str>, bit: Option<&str>) -> bool {
        let (Some(mask), Some(byte_index), Some(bit)) = (self.capabilities, byte_index, bit) else {
            return true;
        };
        let (Ok(byte_index), Ok(bit)) = (byte_index.trim().parse::<usize>(), bit.trim().parse::<u8>())
        else {
            warn!(
                "{} ({}) has an unparsable capability gate, skipping",
                header.id, header.name
            );
            return false;
        };

        let supported = mask.is_supported(byte_index, bit);
        if !supported {
            debug!(
                "{} ({}) not supported by ECU (byte={}, bit={})",
                header.id, header.name, byte_index, bit
            );
        }
        supported
    }
}

fn build(
    header: &Header,
    address: u32,
    length: u8,
    conversion: Conversion,
) -> Option<ParameterDefinition> {
    match ParameterDefinition::new(
        header.id,
        header.name,
        address,
        length,
        conversion.expression,
        conversion.unit,
    ) {
        Ok(definition) => Some(definition.with_storage_type(conversion.storage_type)),
        Err(e) => {
            warn!("{} ({}) skipped: {}", header.id, header.name, e);
            None
        }
    }
}

fn first_child<'a, 'input>(node: Node<'a, 'input>, tag: &str) -> Option<Node<'a, 'input>> {
    node.descendants().find(|n| n.has_tag_name(tag))
}

fn conversion(node: Node) -> Option<Conversion> {
    let element = first_child(node, "conversion")?;
    let expression = element.attribute("expr")?;
    Some(Conversion {
        expression: expression.to_string(),
        unit: DisplayUnit::from_units(element.attribute("units").unwrap_or_default()),
        storage_type: element.attribute("storagetype").and_then(StorageType::from_name),
    })
}

/// `<address length="N">hex</address>`; length defaults to 1
fn parse_address(element: Node) -> Option<(u32, u8)> {
    let address = parse_hex(element.text().unwrap_or_default())?;
    let length = element
        .attribute("length")
        .and_then(|l| l.trim().parse::<u8>().ok())
        .unwrap_or(1);
    Some((address, length))
}

/// Hex with or without a `0x` prefix
fn parse_hex(text: &str) -> Option<u32> {
    let text = text.trim();
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u32::from_str_radix(digits, 16).ok()
}
