//! Framework-namespace factories for the built-in capabilities.

use std::sync::Arc;

use gantry_net::{BceWithLogitsLoss, DevicePlan, Linear, Mlp, MseLoss};
use gantry_store::{JsonFileStore, MemoryStore};

use crate::builder::{Args, Component};
use crate::config::{LoadParams, SaveParams, TrainParams, ValidationParams};
use crate::data::{ConstantProvider, SyntheticProvider};
use crate::error::RunError;
use crate::model::Model;
use crate::optimizer::{Adam, AdamOptions, OptimizerAdapter, Sgd, SgdOptions};
use crate::registry::{CapabilityRegistry, Selector};
use crate::runner::Runner;

pub(crate) fn register(registry: &mut CapabilityRegistry) {
    registry.register_framework(
        "Linear",
        Arc::new(|_, mut args: Args| {
            let in_dim: usize = args.require("in_dim")?;
            let out_dim: usize = args.require("out_dim")?;
            args.finish()?;
            let net = Linear::new(in_dim, out_dim)
                .map_err(|e| RunError::invalid_config(args.path(), e.to_string()))?;
            Ok(Component::Network(Box::new(net)))
        }),
    );

    registry.register_framework(
        "MLP",
        Arc::new(|_, mut args: Args| {
            let dims: Vec<usize> = args.require("dims")?;
            args.finish()?;
            let net = Mlp::new(dims)
                .map_err(|e| RunError::invalid_config(args.path(), e.to_string()))?;
            Ok(Component::Network(Box::new(net)))
        }),
    );

    registry.register_framework(
        "MSE",
        Arc::new(|_, args: Args| {
            args.finish()?;
            Ok(Component::Criterion(Box::new(MseLoss)))
        }),
    );

    registry.register_framework(
        "BCE",
        Arc::new(|_, args: Args| {
            args.finish()?;
            Ok(Component::Criterion(Box::new(BceWithLogitsLoss)))
        }),
    );

    registry.register_framework(
        "SGD",
        Arc::new(|_, mut args: Args| {
            let opts: SgdOptions = args.take("defaults")?.unwrap_or_default();
            args.finish()?;
            Ok(Component::Algorithm(Box::new(Sgd::new(opts))))
        }),
    );

    registry.register_framework(
        "Adam",
        Arc::new(|_, mut args: Args| {
            let opts: AdamOptions = args.take("defaults")?.unwrap_or_default();
            args.finish()?;
            Ok(Component::Algorithm(Box::new(Adam::new(opts))))
        }),
    );

    registry.register_framework(
        "Optimizer",
        Arc::new(|registry, mut args: Args| {
            // `algorithm` is either a nested node or a bare capability
            // name; the string form carries its `defaults` on this node.
            let adapter = if let Some(name) = args.take::<String>("algorithm")? {
                let defaults = args
                    .take::<serde_json::Value>("defaults")?
                    .unwrap_or(serde_json::Value::Null);
                OptimizerAdapter::resolve(registry, &Selector::name(name), defaults)?
            } else {
                args.require_optimizer("algorithm")?
            };
            args.finish()?;
            Ok(Component::Optimizer(adapter))
        }),
    );

    registry.register_framework(
        "Model",
        Arc::new(|_, mut args: Args| {
            let net = args.require_network("net")?;
            let criterion = args.require_criterion("criterion")?;
            let optimizer = args.require_optimizer("optimizer")?;
            let devices: Option<Vec<String>> = args.take("devices")?;
            let seed: u64 = args.take("seed")?.unwrap_or(0);
            args.finish()?;

            let devices = match devices {
                Some(devices) => DevicePlan::parse(&devices)
                    .map_err(|e| RunError::invalid_config(args.path(), e.to_string()))?,
                None => DevicePlan::local(),
            };
            let name = args.name().unwrap_or("model").to_string();
            let model = Model::assemble(name, net, criterion, optimizer, devices, seed)?;
            Ok(Component::Model(model))
        }),
    );

    registry.register_framework(
        "ConstantProvider",
        Arc::new(|_, mut args: Args| {
            let batch_size: usize = args.take("batch_size")?.unwrap_or(4);
            let in_dim: usize = args.require("in_dim")?;
            let out_dim: usize = args.require("out_dim")?;
            let input_fill: f32 = args.take("input_fill")?.unwrap_or(1.0);
            let target_fill: f32 = args.take("target_fill")?.unwrap_or(0.0);
            args.finish()?;

            let provider = ConstantProvider::new(batch_size, in_dim, out_dim)?
                .with_fills(input_fill, target_fill);
            Ok(Component::Provider(Box::new(provider)))
        }),
    );

    registry.register_framework(
        "SyntheticProvider",
        Arc::new(|_, mut args: Args| {
            let batch_size: usize = args.take("batch_size")?.unwrap_or(4);
            let in_dim: usize = args.require("in_dim")?;
            let out_dim: usize = args.require("out_dim")?;
            let seed: u64 = args.take("seed")?.unwrap_or(7);
            args.finish()?;

            let provider = SyntheticProvider::new(batch_size, in_dim, out_dim, seed)?;
            Ok(Component::Provider(Box::new(provider)))
        }),
    );

    registry.register_framework(
        "MemoryStore",
        Arc::new(|_, args: Args| {
            args.finish()?;
            Ok(Component::Store(Box::new(MemoryStore::new())))
        }),
    );

    registry.register_framework(
        "JsonFileStore",
        Arc::new(|_, mut args: Args| {
            let path: String = args.require("path")?;
            args.finish()?;
            Ok(Component::Store(Box::new(JsonFileStore::new(path))))
        }),
    );

    registry.register_framework(
        "Runner",
        Arc::new(|_, mut args: Args| {
            let exp_id: String = args.require("exp_id")?;
            let model = args.require_model("model")?;
            let provider = args.require_provider("provider")?;
            let store = args.require_store("store")?;
            let train_params: TrainParams = args.take("train_params")?.unwrap_or_default();
            let validation_params: ValidationParams =
                args.take("validation_params")?.unwrap_or_default();
            let save_params: SaveParams = args.take("save_params")?.unwrap_or_default();
            let load_params: LoadParams = args.take("load_params")?.unwrap_or_default();
            args.finish()?;

            Ok(Component::Runner(Runner::assemble(
                exp_id,
                model,
                provider,
                store,
                train_params,
                validation_params,
                save_params,
                load_params,
            )))
        }),
    );
}
