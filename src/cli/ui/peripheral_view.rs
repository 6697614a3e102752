use std::fmt::{self, Display, Formatter};

use crate::central::Peripheral;
use crate::utils::format_rssi;

use super::painter::Painter;
use super::table::Table;

/// Renders peripherals as one table row each, in registry order.
pub(crate) struct PeripheralTable<'a> {
    peripherals: &'a [Peripheral],
    painter: &'a Painter,
}

impl<'a> PeripheralTable<'a> {
    pub(crate) fn new(peripherals: &'a [Peripheral], painter: &'a Painter) -> Self {
        Self {
            peripherals,
            painter,
        }
    }
}

impl Display for PeripheralTable<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let rows: Vec<Vec<String>> = self
            .peripherals
            .iter()
            .map(|peripheral| {
                vec![
                    self.painter.value(peripheral.id().as_str()),
                    peripheral.local_name().unwrap_or("<unknown>").to_string(),
                    format_rssi(peripheral.rssi()),
                    self.painter.state(peripheral.state()),
                ]
            })
            .collect();
        let table = Table::grid(["id", "name", "rssi", "state"], rows);
        if table.is_empty() {
            return write!(f, "{}", self.painter.muted("none"));
        }
        write!(f, "{table}")
    }
}

/// Renders one peripheral as a field/value table.
pub(crate) struct PeripheralView<'a> {
    peripheral: &'a Peripheral,
    painter: &'a Painter,
}

impl<'a> PeripheralView<'a> {
    pub(crate) fn new(peripheral: &'a Peripheral, painter: &'a Painter) -> Self {
        Self {
            peripheral,
            painter,
        }
    }
}

impl Display for PeripheralView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = self.peripheral.local_name().unwrap_or("<unknown>");
        let table = Table::key_value(
            self.painter,
            vec![
                ("id", self.painter.value(self.peripheral.id().as_str())),
                ("name", self.painter.value(name)),
                ("rssi", self.painter.value(format_rssi(self.peripheral.rssi()))),
                ("state", self.painter.state(self.peripheral.state())),
            ],
        );
        write!(f, "{table}")
    }
}
