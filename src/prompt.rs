//! Instruction text sent to the image-edit models.
//!
//! The wording is French because the product ships in French. Each selection
//! owns exactly one clause, so changing a color only changes that clause.

use crate::models::{ArtworkKind, FrameStyle, Selections, Tint};

pub fn build_prompt(selections: &Selections) -> String {
    match selections.artwork {
        ArtworkKind::Statue => statue_prompt(selections.pedestal, selections.room),
        ArtworkKind::Painting => painting_prompt(selections.frame, selections.wall),
    }
}

fn wall_clause(wall: Tint) -> &'static str {
    match wall {
        Tint::White => "mur blanc",
        Tint::Black => "mur noir",
        Tint::Gray => "mur gris",
    }
}

fn room_clause(room: Tint) -> &'static str {
    match room {
        Tint::White => "pièce blanche",
        Tint::Black => "pièce noire",
        Tint::Gray => "pièce grise",
    }
}

fn pedestal_clause(pedestal: Tint) -> &'static str {
    match pedestal {
        Tint::White => "socle blanc",
        Tint::Black => "socle noir",
        Tint::Gray => "socle gris",
    }
}

fn frame_clause(frame: FrameStyle) -> Option<&'static str> {
    match frame {
        FrameStyle::None => None,
        FrameStyle::Black => Some(" Ajoutez un cadre fin et noir autour du tableau."),
        FrameStyle::White => Some(" Ajoutez un cadre fin et blanc autour du tableau."),
    }
}

fn statue_prompt(pedestal: Tint, room: Tint) -> String {
    let pedestal = pedestal_clause(pedestal);
    let room = room_clause(room);
    format!(
        "Tâche impérative : Isoler la statue de l'image d'origine. Ignorer complètement l'arrière-plan. \
        Placer la statue sur un {pedestal} épuré. Le tout doit être dans une {room} vide et très lumineuse. \
        Le plus important : le cadrage doit être un plan très rapproché (gros plan) de la statue sur son socle. \
        La statue doit remplir la quasi-totalité de la hauteur de l'image. \
        Le but est de voir les détails de la sculpture, pas la pièce. L'image finale doit être photoréaliste."
    )
}

fn painting_prompt(frame: FrameStyle, wall: Tint) -> String {
    let wall = wall_clause(wall);
    let mut prompt = format!(
        "Tâche impérative : Prenez le tableau de cette image, redressez-le parfaitement et placez-le sur un {wall}, propre et plat. \
        La prise de vue doit être parfaitement frontale. L'éclairage doit être doux et uniforme. \
        Rendez également les couleurs du tableau plus vives et éclatantes. \
        Le plus important : le cadrage doit être serré sur le tableau. \
        Le tableau (avec son cadre s'il est demandé) doit occuper la majeure partie de l'image, \
        ne laissant qu'une petite marge de {wall} visible tout autour."
    );
    if let Some(frame) = frame_clause(frame) {
        prompt.push_str(frame);
    }
    prompt.push_str(" L'image finale doit être une photo photoréaliste et de haute qualité.");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn painting(frame: FrameStyle, wall: Tint) -> Selections {
        Selections { artwork: ArtworkKind::Painting, frame, wall, ..Default::default() }
    }

    fn statue(room: Tint, pedestal: Tint) -> Selections {
        Selections { artwork: ArtworkKind::Statue, room, pedestal, ..Default::default() }
    }

    #[test]
    fn painting_prompt_reflects_frame_and_wall() {
        let p = build_prompt(&painting(FrameStyle::Black, Tint::Gray));
        assert!(p.contains("mur gris"));
        assert!(p.contains("cadre fin et noir"));
        assert!(p.ends_with("photoréaliste et de haute qualité."));
    }

    #[test]
    fn changing_wall_only_changes_wall_clause() {
        let white = build_prompt(&painting(FrameStyle::White, Tint::White));
        let black = build_prompt(&painting(FrameStyle::White, Tint::Black));
        assert_eq!(white.replace("mur blanc", "mur noir"), black);
    }

    #[test]
    fn frameless_painting_has_no_frame_clause() {
        let p = build_prompt(&painting(FrameStyle::None, Tint::White));
        assert!(!p.contains("Ajoutez un cadre"));
        let framed = build_prompt(&painting(FrameStyle::White, Tint::White));
        assert_eq!(framed.replace(" Ajoutez un cadre fin et blanc autour du tableau.", ""), p);
    }

    #[test]
    fn statue_prompt_reflects_room_and_pedestal() {
        let p = build_prompt(&statue(Tint::Black, Tint::Gray));
        assert!(p.contains("socle gris"));
        assert!(p.contains("pièce noire"));
        assert!(!p.contains("mur"));
    }

    #[test]
    fn statue_prompt_ignores_painting_options() {
        let base = statue(Tint::Gray, Tint::White);
        let other = Selections { frame: FrameStyle::Black, wall: Tint::Black, ..base };
        assert_eq!(build_prompt(&base), build_prompt(&other));
    }

    #[test]
    fn every_combination_is_deterministic_and_distinct() {
        let tints = [Tint::White, Tint::Black, Tint::Gray];
        let frames = [FrameStyle::None, FrameStyle::Black, FrameStyle::White];
        let mut seen = std::collections::HashSet::new();
        for frame in frames {
            for wall in tints {
                let s = painting(frame, wall);
                assert_eq!(build_prompt(&s), build_prompt(&s));
                assert!(seen.insert(build_prompt(&s)));
            }
        }
        for room in tints {
            for pedestal in tints {
                assert!(seen.insert(build_prompt(&statue(room, pedestal))));
            }
        }
        assert_eq!(seen.len(), 18);
    }
}
