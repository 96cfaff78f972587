//! Integration tests for the realm server and client
//!
//! These tests drive whole scenarios across modules: the simulation as the
//! network loop would drive it, and a real TCP session through the client.

use assert_approx_eq::assert_approx_eq;
use client::mirror::WorldMirror;
use client::network::Connection;
use server::broadcast::Outbox;
use server::config::ServerConfig;
use server::monster::SpawnPoint;
use server::persistence::PersistenceHandle;
use server::simulation::Simulation;
use shared::{
    ClientEvent, Direction, ItemStack, JobClass, Loot, MonsterKind, MonsterState, ParticipantId,
    ServerEvent,
};
use std::time::Duration;
use tokio::time::timeout;

fn simulation(spawns: &[SpawnPoint]) -> Simulation {
    Simulation::new(
        &ServerConfig::default(),
        spawns,
        Vec::new(),
        PersistenceHandle::disabled(),
    )
}

fn slime_at(x: f32, y: f32) -> SpawnPoint {
    SpawnPoint {
        kind: MonsterKind::Slime,
        x,
        y,
    }
}

fn send(sim: &mut Simulation, id: ParticipantId, event: ClientEvent) -> Outbox {
    let mut out = Outbox::new();
    sim.handle_event(id, event, &mut out);
    out
}

fn join(sim: &mut Simulation, id: ParticipantId, name: &str, x: f32, y: f32) -> Outbox {
    send(
        sim,
        id,
        ClientEvent::Join {
            name: name.to_string(),
            job: JobClass::Warrior,
            x,
            y,
        },
    )
}

fn hit(monster_id: u32, damage: i32) -> ClientEvent {
    ClientEvent::MonsterDamage {
        monster_id,
        damage,
        new_hp: 0,
        killed: false,
        exp: 0,
    }
}

/// COMBAT TESTS
mod combat_tests {
    use super::*;

    /// Approaching a slime draws aggro; hits are reduced by defense until the kill
    #[test]
    fn aggro_then_kill() {
        let mut sim = simulation(&[slime_at(100.0, 100.0)]);
        join(&mut sim, 1, "ayla", 400.0, 100.0);

        send(
            &mut sim,
            1,
            ClientEvent::Move {
                x: 200.0,
                y: 100.0,
                direction: Direction::Left,
                is_moving: true,
            },
        );
        let mut out = Outbox::new();
        sim.tick(50, &mut out);
        let slime = sim.monsters().get(1).unwrap();
        assert_eq!(slime.state, MonsterState::Chase);
        assert_eq!(slime.target, Some(1));

        let mut hp_sequence = Vec::new();
        for _ in 0..3 {
            let out = send(&mut sim, 1, hit(1, 10));
            for event in out.events_for(1) {
                if let ServerEvent::MonsterDamaged { damage, hp, .. } = event {
                    assert_eq!(*damage, 8);
                    hp_sequence.push(*hp);
                }
            }
        }
        assert_eq!(hp_sequence, vec![42, 34, 26]);

        let out = send(&mut sim, 1, hit(1, 30));
        let events = out.events_for(1);
        assert!(events.contains(&&ServerEvent::MonsterKilled {
            monster_id: 1,
            killer_id: 1,
            exp: 25,
        }));
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::ExpGained {
                amount: 25,
                total: 25,
                ..
            }
        )));

        let slime = sim.monsters().get(1).unwrap();
        assert!(!slime.alive);
        assert_eq!(slime.hp(), 0);
        assert_eq!(slime.respawn_timer_ms, 10_000);
    }

    /// A dead monster comes back at full health after its respawn delay
    #[test]
    fn slime_respawns_after_delay() {
        let mut sim = simulation(&[slime_at(100.0, 100.0)]);
        join(&mut sim, 1, "ayla", 1000.0, 1000.0);
        send(&mut sim, 1, hit(1, 500));

        let mut out = Outbox::new();
        for _ in 0..99 {
            sim.tick(100, &mut out);
        }
        assert!(!sim.monsters().get(1).unwrap().alive);

        sim.tick(100, &mut out);
        let slime = sim.monsters().get(1).unwrap();
        assert!(slime.alive);
        assert_eq!(slime.hp(), slime.max_hp());
        assert_eq!(slime.state, MonsterState::Idle);
    }
}

/// TRADE TESTS
mod trade_tests {
    use super::*;
    use server::trade::{settle, TradeManager, TradeState};
    use shared::Inventory;

    fn stocked(item: &str, gold: u64) -> Inventory {
        let mut inventory = Inventory::default();
        assert!(inventory.add(&ItemStack::new(item, 1)));
        inventory.gold = gold;
        inventory
    }

    /// Both sides confirm, then the offers swap atomically
    #[test]
    fn double_confirm_swaps_offers() {
        let mut trades = TradeManager::new(30_000);
        let inventory_a = stocked("sword", 300);
        let inventory_b = stocked("shield", 80);

        trades.request(1, 2).unwrap();
        trades.accept(2, 1).unwrap();

        trades
            .update_offer(1, vec![ItemStack::new("sword", 1)], 100, &inventory_a)
            .unwrap();
        let (_, ready) = trades.set_confirmed(1, true).unwrap();
        assert!(ready.is_none());

        trades
            .update_offer(2, vec![ItemStack::new("shield", 1)], 50, &inventory_b)
            .unwrap();
        let (_, ready) = trades.set_confirmed(2, true).unwrap();
        let mut session = ready.expect("both sides confirmed");

        let settlement = settle(&mut session, &inventory_a, &inventory_b).unwrap();
        assert_eq!(session.state, TradeState::Settled);

        let a = &settlement.inventory_a;
        assert_eq!(a.quantity_of("sword"), 0);
        assert_eq!(a.quantity_of("shield"), 1);
        assert_eq!(a.gold, 300 - 100 + 50);

        let b = &settlement.inventory_b;
        assert_eq!(b.quantity_of("shield"), 0);
        assert_eq!(b.quantity_of("sword"), 1);
        assert_eq!(b.gold, 80 - 50 + 100);

        // The session is closed; further edits have nothing to act on.
        assert!(trades
            .update_offer(1, Vec::new(), 0, &settlement.inventory_a)
            .is_err());
        assert!(!trades.is_trading(1));
    }

    /// Loot picked up after a kill can be traded away through the simulation
    #[test]
    fn looted_gold_changes_hands() {
        let mut sim = simulation(&[slime_at(100.0, 100.0)]);
        join(&mut sim, 1, "ayla", 100.0, 120.0);
        join(&mut sim, 2, "bram", 1000.0, 1000.0);

        let out = send(&mut sim, 1, hit(1, 500));
        let (item_id, gold) = out
            .events_for(1)
            .into_iter()
            .find_map(|event| match event {
                ServerEvent::ItemDropped { item } => match item.loot {
                    Loot::Gold(gold) => Some((item.id, gold)),
                    Loot::Item(_) => None,
                },
                _ => None,
            })
            .expect("gold always drops");
        assert!((5..=12).contains(&gold));

        send(&mut sim, 1, ClientEvent::ItemPickup { item_id });
        assert_eq!(sim.world().inventory(1).unwrap().gold, gold);

        let mut bram = WorldMirror::new();
        let steps = vec![
            (1, ClientEvent::TradeRequest { target_id: 2 }),
            (2, ClientEvent::TradeAccept { from_id: 1 }),
            (
                1,
                ClientEvent::TradeUpdateOffer {
                    items: Vec::new(),
                    gold,
                },
            ),
            (1, ClientEvent::TradeConfirm),
            (2, ClientEvent::TradeConfirm),
        ];
        for (id, event) in steps {
            let out = send(&mut sim, id, event);
            for event in out.events_for(2) {
                bram.apply(event);
            }
        }

        assert_eq!(sim.world().inventory(1).unwrap().gold, 0);
        assert_eq!(sim.world().inventory(2).unwrap().gold, gold);
        assert_eq!(bram.inventory.gold, gold);
        assert!(bram.trade.is_none());
        assert!(!sim.trades().is_trading(1));
    }
}

/// PARTY TESTS
mod party_tests {
    use super::*;

    /// The earliest remaining joiner inherits leadership
    #[test]
    fn leader_disconnect_hands_over() {
        let mut sim = simulation(&[]);
        for (id, name) in [(1, "pia"), (2, "quin"), (3, "rhea")] {
            join(&mut sim, id, name, 50.0 * id as f32, 50.0);
        }

        send(&mut sim, 1, ClientEvent::PartyCreate);
        let party_id = sim.parties().party_of(1).unwrap().id;
        for member in [2, 3] {
            send(&mut sim, 1, ClientEvent::PartyInvite { target_id: member });
            send(&mut sim, member, ClientEvent::PartyInviteAccept { party_id });
        }
        assert_eq!(sim.parties().party_of(1).unwrap().members, vec![1, 2, 3]);

        let mut out = Outbox::new();
        sim.disconnect(1, &mut out);

        let handover = ServerEvent::PartyLeaderChanged {
            party_id,
            leader_id: 2,
        };
        assert!(out.events_for(2).contains(&&handover));
        assert!(out.events_for(3).contains(&&handover));

        let party = sim.parties().party_of(2).unwrap();
        assert_eq!(party.leader, 2);
        assert_eq!(party.members, vec![2, 3]);
    }
}

/// CLIENT-SERVER TESTS
mod client_server_tests {
    use super::*;
    use server::network::Server;

    async fn start_server() -> String {
        let config = ServerConfig {
            port: 0,
            ..ServerConfig::default()
        };
        let server = Server::new(config).await.unwrap();
        let addr = server.local_addr().to_string();
        tokio::spawn(async move {
            let _ = server.run().await;
        });
        addr
    }

    fn join_as(name: &str, x: f32, y: f32) -> ClientEvent {
        ClientEvent::Join {
            name: name.to_string(),
            job: JobClass::Archer,
            x,
            y,
        }
    }

    /// Feeds events into the mirror until one matches
    async fn wait_for(
        connection: &mut Connection,
        mirror: &mut WorldMirror,
        wanted: impl Fn(&ServerEvent) -> bool,
    ) -> ServerEvent {
        loop {
            let event = timeout(Duration::from_secs(5), connection.recv())
                .await
                .expect("timed out waiting for event")
                .expect("connection closed");
            mirror.apply(&event);
            if wanted(&event) {
                return event;
            }
        }
    }

    /// Two clients see each other join, move, chat and leave
    #[tokio::test]
    async fn shared_world_over_tcp() {
        let addr = start_server().await;

        let mut ayla = Connection::connect(&addr, join_as("ayla", 100.0, 100.0))
            .await
            .unwrap();
        let mut ayla_view = WorldMirror::new();
        wait_for(&mut ayla, &mut ayla_view, |e| {
            matches!(e, ServerEvent::SyncState { .. })
        })
        .await;
        assert_eq!(ayla_view.self_id(), Some(1));

        let mut bram = Connection::connect(&addr, join_as("bram", 120.0, 100.0))
            .await
            .unwrap();
        let mut bram_view = WorldMirror::new();
        wait_for(&mut bram, &mut bram_view, |e| {
            matches!(e, ServerEvent::SyncState { .. })
        })
        .await;
        assert_eq!(bram_view.remote_count(), 1);

        wait_for(&mut ayla, &mut ayla_view, |e| {
            matches!(e, ServerEvent::PlayerJoined { .. })
        })
        .await;
        assert_eq!(ayla_view.remote(2).map(|p| p.name.as_str()), Some("bram"));

        bram_view.predict_move(150.0, 110.0, Direction::Right, true);
        bram.send(&ClientEvent::Move {
            x: 150.0,
            y: 110.0,
            direction: Direction::Right,
            is_moving: true,
        })
        .await
        .unwrap();
        wait_for(&mut ayla, &mut ayla_view, |e| {
            matches!(e, ServerEvent::PlayerMoved { .. })
        })
        .await;
        for _ in 0..60 {
            ayla_view.advance(0.05);
        }
        let seen = ayla_view.remote(2).unwrap();
        assert_approx_eq!(seen.x, 150.0, 0.01);
        assert_approx_eq!(seen.y, 110.0, 0.01);

        ayla.send(&ClientEvent::ChatSend {
            message: "  hello there  ".to_string(),
            channel: shared::ChatChannel::Global,
            target_id: None,
        })
        .await
        .unwrap();
        let chat = wait_for(&mut bram, &mut bram_view, |e| {
            matches!(e, ServerEvent::ChatMessage { .. })
        })
        .await;
        match chat {
            ServerEvent::ChatMessage {
                from_id,
                from_name,
                message,
                ..
            } => {
                assert_eq!(from_id, 1);
                assert_eq!(from_name, "ayla");
                assert_eq!(message, "hello there");
            }
            other => panic!("unexpected {:?}", other),
        }

        bram.send(&ClientEvent::Leave).await.unwrap();
        wait_for(&mut ayla, &mut ayla_view, |e| {
            matches!(e, ServerEvent::PlayerLeft { player_id: 2 })
        })
        .await;
        assert_eq!(ayla_view.remote_count(), 0);
    }

    /// A name is free again once its owner leaves
    #[tokio::test]
    async fn name_is_released_after_leave() {
        let addr = start_server().await;

        let mut first = Connection::connect(&addr, join_as("cato", 100.0, 100.0))
            .await
            .unwrap();
        let mut view = WorldMirror::new();
        wait_for(&mut first, &mut view, |e| {
            matches!(e, ServerEvent::SyncState { .. })
        })
        .await;

        let mut clash = Connection::connect(&addr, join_as("cato", 100.0, 100.0))
            .await
            .unwrap();
        let mut clash_view = WorldMirror::new();
        wait_for(&mut clash, &mut clash_view, |e| {
            matches!(e, ServerEvent::Error { .. })
        })
        .await;
        assert_eq!(
            clash_view.last_error.as_ref().map(|(code, _)| *code),
            Some(shared::ErrorCode::NameTaken)
        );

        first.send(&ClientEvent::Leave).await.unwrap();
        drop(first);
        // Give the server a moment to process the leave before retrying.
        tokio::time::sleep(Duration::from_millis(100)).await;

        clash.send(&join_as("cato", 100.0, 100.0)).await.unwrap();
        wait_for(&mut clash, &mut clash_view, |e| {
            matches!(e, ServerEvent::SyncState { .. })
        })
        .await;
        assert!(clash_view.local().is_some());
    }
}
