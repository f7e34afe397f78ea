//! Codestream creation parameters and their `Name=value` option syntax.
//!
//! Options are written the way codec command lines take them:
//! `Clayers=4`, `Creversible=yes`, `Qfactor=60`, `Corder=RPCL`,
//! `Cblk={64,64}`, `Cmodes=HT|BYPASS`, `Ssampling:C1={2,2}`, and so on.
//! [`CodingParams::parse_options`] splits a string on `;` and whitespace and
//! applies each token in order.

use super::parser::{CodestreamHeader, ComponentInfo, ProgressionOrder};
use crate::constants::{DEFAULT_LEVELS, DEFAULT_TILE_SIZE, MAX_BITS_PER_SAMPLE, MAX_LAYERS};
use crate::error::{BridgeError, Result};
use bitflags::bitflags;

bitflags! {
    /// Code-block coding style switches, numbered as in the COD segment.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BlockModes: u8 {
        const BYPASS = 0x01;
        const RESET = 0x02;
        const RESTART = 0x04;
        const CAUSAL = 0x08;
        const ERTERM = 0x10;
        const SEGMARK = 0x20;
        const HT = 0x40;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentType {
    Y,
    Cb,
    Cr,
    R,
    G,
    B,
    /// Not part of any colour transform.
    N,
}

impl ComponentType {
    fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "Y" => Self::Y,
            "Cb" => Self::Cb,
            "Cr" => Self::Cr,
            "R" => Self::R,
            "G" => Self::G,
            "B" => Self::B,
            "N" => Self::N,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodingParams {
    pub width: u32,
    pub height: u32,
    pub components: Vec<ComponentInfo>,
    pub tile_width: u32,
    pub tile_height: u32,
    pub layers: u16,
    pub reversible: bool,
    pub qfactor: Option<u8>,
    pub levels: u8,
    pub progression: ProgressionOrder,
    /// log2 of the code-block height and width.
    pub code_block: (u8, u8),
    pub ycc: bool,
    pub modes: BlockModes,
    pub component_types: Vec<ComponentType>,
}

impl CodingParams {
    pub fn new(width: u32, height: u32, components: Vec<ComponentInfo>) -> Self {
        Self {
            width,
            height,
            components,
            tile_width: DEFAULT_TILE_SIZE,
            tile_height: DEFAULT_TILE_SIZE,
            layers: 1,
            reversible: false,
            qfactor: None,
            levels: DEFAULT_LEVELS,
            progression: ProgressionOrder::Lrcp,
            code_block: (6, 6),
            ycc: false,
            modes: BlockModes::empty(),
            component_types: Vec::new(),
        }
    }

    pub fn high_throughput(&self) -> bool {
        self.modes.contains(BlockModes::HT)
    }

    /// Apply one `Name=value` attribute.
    pub fn parse_string(&mut self, token: &str) -> Result<()> {
        let bad = |reason: &'static str| BridgeError::invalid_option(token, reason);
        let (name, value) = token.split_once('=').ok_or_else(|| bad("expected Name=value"))?;
        let (name, component) = match name.split_once(":C") {
            Some((name, index)) => (
                name,
                Some(
                    index
                        .parse::<usize>()
                        .map_err(|_| bad("bad component qualifier"))?,
                ),
            ),
            None => (name, None),
        };
        if component.is_some() && name != "Ssampling" {
            return Err(bad("attribute takes no component qualifier"));
        }

        match name {
            "Clayers" => {
                let layers = parse_int(value).ok_or_else(|| bad("expected an integer"))?;
                if layers == 0 || layers > u32::from(u16::MAX) {
                    return Err(bad("layer count out of range"));
                }
                self.layers = layers as u16;
            }
            "Creversible" => {
                self.reversible = parse_bool(value).ok_or_else(|| bad("expected yes or no"))?
            }
            "Qfactor" => {
                let q = parse_int(value).ok_or_else(|| bad("expected an integer"))?;
                if !(1..=100).contains(&q) {
                    return Err(bad("quality factor must be 1 to 100"));
                }
                self.qfactor = Some(q as u8);
            }
            "Clevels" => {
                let levels = parse_int(value).ok_or_else(|| bad("expected an integer"))?;
                if levels > 32 {
                    return Err(bad("at most 32 decomposition levels"));
                }
                self.levels = levels as u8;
            }
            "Corder" => {
                self.progression = match value {
                    "LRCP" => ProgressionOrder::Lrcp,
                    "RLCP" => ProgressionOrder::Rlcp,
                    "RPCL" => ProgressionOrder::Rpcl,
                    "PCRL" => ProgressionOrder::Pcrl,
                    "CPRL" => ProgressionOrder::Cprl,
                    _ => return Err(bad("unknown progression order")),
                }
            }
            "Cblk" => {
                let (h, w) = parse_pair(value).ok_or_else(|| bad("expected {height,width}"))?;
                let h = block_exponent(h).ok_or_else(|| bad("code-block sides are powers of two, 4 to 1024"))?;
                let w = block_exponent(w).ok_or_else(|| bad("code-block sides are powers of two, 4 to 1024"))?;
                if h + w > 12 {
                    return Err(bad("code-block area above 4096"));
                }
                self.code_block = (h, w);
            }
            "Cycc" => self.ycc = parse_bool(value).ok_or_else(|| bad("expected yes or no"))?,
            "Cmodes" => {
                let mut modes = BlockModes::empty();
                for flag in value.split('|') {
                    modes |= match flag {
                        "0" => BlockModes::empty(),
                        "BYPASS" => BlockModes::BYPASS,
                        "RESET" => BlockModes::RESET,
                        "RESTART" => BlockModes::RESTART,
                        "CAUSAL" => BlockModes::CAUSAL,
                        "ERTERM" => BlockModes::ERTERM,
                        "SEGMARK" => BlockModes::SEGMARK,
                        "HT" => BlockModes::HT,
                        _ => return Err(bad("unknown block coding mode")),
                    };
                }
                self.modes = modes;
            }
            "Ctype" => {
                self.component_types = value
                    .split(',')
                    .map(ComponentType::parse)
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| bad("unknown component type"))?;
            }
            "Stiles" => {
                let (h, w) = parse_pair(value).ok_or_else(|| bad("expected {height,width}"))?;
                if h == 0 || w == 0 {
                    return Err(bad("tile size must be positive"));
                }
                self.tile_height = h;
                self.tile_width = w;
            }
            "Ssampling" => {
                let factors = parse_pairs(value).ok_or_else(|| bad("expected {y,x} pairs"))?;
                if factors.iter().any(|&(y, x)| y == 0 || x == 0 || y > 255 || x > 255) {
                    return Err(bad("sampling factors must be 1 to 255"));
                }
                match component {
                    Some(index) => {
                        let [(y, x)] = factors[..] else {
                            return Err(bad("one {y,x} pair per component"));
                        };
                        let c = self
                            .components
                            .get_mut(index)
                            .ok_or_else(|| bad("no such component"))?;
                        c.dy = y as u8;
                        c.dx = x as u8;
                    }
                    None => {
                        // The last pair repeats for any remaining components.
                        let mut last = (1, 1);
                        for (i, c) in self.components.iter_mut().enumerate() {
                            let (y, x) = factors.get(i).copied().unwrap_or(last);
                            last = (y, x);
                            c.dy = y as u8;
                            c.dx = x as u8;
                        }
                    }
                }
            }
            _ => return Err(bad("unknown attribute")),
        }
        Ok(())
    }

    /// Apply a `;` or whitespace separated list of attributes.
    pub fn parse_options(&mut self, options: &str) -> Result<()> {
        options
            .split(|c: char| c == ';' || c.is_whitespace())
            .filter(|token| !token.is_empty())
            .try_for_each(|token| self.parse_string(token))
    }

    /// Check the set is complete and consistent.
    pub fn finalize(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(BridgeError::invalid_argument("image has no pixels"));
        }
        if self.components.is_empty() || self.components.len() > 16384 {
            return Err(BridgeError::invalid_argument("component count out of range"));
        }
        if let Some(c) = self
            .components
            .iter()
            .find(|c| c.precision == 0 || u32::from(c.precision) > MAX_BITS_PER_SAMPLE)
        {
            return Err(BridgeError::UnsupportedBitDepth {
                bits: u32::from(c.precision),
            });
        }
        if usize::from(self.layers) > MAX_LAYERS {
            return Err(BridgeError::TooManyLayers {
                count: usize::from(self.layers),
                max: MAX_LAYERS,
            });
        }
        if self.tile_width == 0 || self.tile_height == 0 {
            return Err(BridgeError::invalid_argument("tile size must be positive"));
        }
        if self.ycc {
            let [a, b, c, ..] = self.components[..] else {
                return Err(BridgeError::invalid_option(
                    "Cycc=yes",
                    "colour transform needs three components",
                ));
            };
            if a.precision != b.precision || b.precision != c.precision {
                return Err(BridgeError::invalid_option(
                    "Cycc=yes",
                    "colour transform needs equal precisions",
                ));
            }
        }
        if !self.component_types.is_empty() && self.component_types.len() != self.components.len()
        {
            return Err(BridgeError::invalid_option(
                "Ctype",
                "one type per component",
            ));
        }
        Ok(())
    }

    /// The main header a codec writes for these parameters.
    pub fn to_header(&self) -> CodestreamHeader {
        CodestreamHeader {
            width: self.width,
            height: self.height,
            tile_width: self.tile_width,
            tile_height: self.tile_height,
            components: self.components.clone(),
            layers: self.layers,
            levels: self.levels,
            progression: self.progression,
            multi_component_transform: self.ycc,
            code_block_height_exp: self.code_block.0,
            code_block_width_exp: self.code_block.1,
            reversible: self.reversible,
            high_throughput: self.high_throughput(),
            ..CodestreamHeader::default()
        }
    }
}

fn parse_int(value: &str) -> Option<u32> {
    value.trim().parse().ok()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "yes" | "true" | "1" => Some(true),
        "no" | "false" | "0" => Some(false),
        _ => None,
    }
}

fn parse_pair(value: &str) -> Option<(u32, u32)> {
    let inner = value.strip_prefix('{')?.strip_suffix('}')?;
    let (a, b) = inner.split_once(',')?;
    Some((parse_int(a)?, parse_int(b)?))
}

fn parse_pairs(value: &str) -> Option<Vec<(u32, u32)>> {
    let mut pairs = Vec::new();
    let mut rest = value;
    while !rest.is_empty() {
        let end = rest.find('}')?;
        pairs.push(parse_pair(&rest[..=end])?);
        rest = &rest[end + 1..];
        rest = rest.strip_prefix(',').unwrap_or(rest);
    }
    if pairs.is_empty() { None } else { Some(pairs) }
}

fn block_exponent(side: u32) -> Option<u8> {
    if side.is_power_of_two() && (4..=1024).contains(&side) {
        Some(side.trailing_zeros() as u8)
    } else {
        None
    }
}
