//! Message catalog — location labels and event copy per level and tone.
//! The catalog is content, not logic: the generator only asks for an entry.

use rastro_core::types::ToneOfVoice;

/// Copy attached to one timeline event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub location_label: String,
    pub text: String,
}

/// Source of event copy, keyed by `(level, stage_index, tone)`.
pub trait MessageCatalog: Send + Sync {
    fn entry(&self, level: u8, stage_index: u32, tone: ToneOfVoice) -> CatalogEntry;
}

/// (location, formal text, friendly text) variants per level.
type Variant = (&'static str, &'static str, &'static str);

const POSTED: &[Variant] = &[
    (
        "Agência de postagem",
        "Objeto postado e recebido pela unidade de origem.",
        "Seu pedido foi postado e já está com a gente!",
    ),
    (
        "Unidade de coleta",
        "Objeto coletado no remetente.",
        "Buscamos seu pedido com o vendedor.",
    ),
];

const IN_TRANSIT: &[Variant] = &[
    (
        "Centro de tratamento",
        "Objeto em tratamento no centro de distribuição.",
        "Seu pedido está sendo separado no centro de distribuição.",
    ),
    (
        "Em rota entre unidades",
        "Objeto em trânsito entre unidades operacionais.",
        "Seu pedido está viajando até você!",
    ),
    (
        "Centro de distribuição regional",
        "Objeto recebido na unidade regional.",
        "Seu pedido chegou na sua região.",
    ),
    (
        "Unidade de fiscalização",
        "Objeto liberado após conferência.",
        "Conferência feita, tudo certo com o seu pedido.",
    ),
];

const OUT_FOR_DELIVERY: &[Variant] = &[
    (
        "Unidade de distribuição local",
        "Objeto saiu para entrega ao destinatário.",
        "Seu pedido saiu para entrega, fique de olho!",
    ),
];

const DELIVERED: &[Variant] = &[
    (
        "Endereço do destinatário",
        "Objeto entregue ao destinatário.",
        "Entregue! Aproveite seu pedido.",
    ),
];

/// Built-in Portuguese catalog.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog;

impl StaticCatalog {
    pub fn new() -> Self {
        Self
    }

    fn variants(level: u8) -> &'static [Variant] {
        match level {
            0 | 1 => POSTED,
            2 | 3 => IN_TRANSIT,
            4 => OUT_FOR_DELIVERY,
            _ => DELIVERED,
        }
    }
}

impl MessageCatalog for StaticCatalog {
    fn entry(&self, level: u8, stage_index: u32, tone: ToneOfVoice) -> CatalogEntry {
        let variants = Self::variants(level);
        let (location, formal, friendly) = variants[stage_index as usize % variants.len()];
        let text = match tone {
            ToneOfVoice::Formal => formal,
            ToneOfVoice::Friendly => friendly,
        };
        CatalogEntry {
            location_label: location.to_string(),
            text: text.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tone_changes_text_not_location() {
        let catalog = StaticCatalog::new();
        let formal = catalog.entry(1, 0, ToneOfVoice::Formal);
        let friendly = catalog.entry(1, 0, ToneOfVoice::Friendly);
        assert_eq!(formal.location_label, friendly.location_label);
        assert_ne!(formal.text, friendly.text);
    }

    #[test]
    fn test_stage_index_cycles_variants() {
        let catalog = StaticCatalog::new();
        let a = catalog.entry(2, 0, ToneOfVoice::Formal);
        let b = catalog.entry(2, 4, ToneOfVoice::Formal);
        assert_eq!(a, b);
        assert_eq!(catalog.entry(5, 7, ToneOfVoice::Formal).text, "Objeto entregue ao destinatário.");
    }
}
